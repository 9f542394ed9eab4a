//! Cluster selection

use axum::http::HeaderMap;
use tracing::debug;

use crate::cluster::ClusterDetails;
use crate::error::{Error, Result};

/// Read the cluster selector header.
///
/// Returns `None` when the header is absent or empty. A header sent more than
/// once, or a value with anything but visible ASCII, is rejected.
pub fn cluster_selector(headers: &HeaderMap, header_name: &str) -> Result<Option<String>> {
    let mut values = headers.get_all(header_name).iter();
    let Some(value) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(Error::InvalidRequest(format!(
            "header '{}' must not be repeated",
            header_name
        )));
    }

    let bytes = value.as_bytes();
    if !bytes.iter().all(|b| b.is_ascii_graphic()) {
        return Err(Error::InvalidRequest(format!(
            "header '{}' must be a plain cluster name",
            header_name
        )));
    }
    if bytes.is_empty() {
        return Ok(None);
    }

    // is_ascii_graphic guarantees valid UTF-8
    Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
}

/// Pick the target cluster from a directory snapshot.
///
/// Precedence: exact name match for `selector`, otherwise the single cluster
/// when exactly one exists, otherwise failure.
pub fn select_cluster(
    clusters: Vec<ClusterDetails>,
    selector: Option<&str>,
) -> Result<ClusterDetails> {
    if clusters.is_empty() {
        return Err(Error::ClusterNotFound("no clusters configured".into()));
    }

    let Some(name) = selector else {
        return single_cluster(clusters);
    };

    let mut exact = None;
    for cluster in clusters.iter() {
        if cluster.name == name {
            if exact.is_some() {
                return Err(Error::Config(format!(
                    "cluster name '{}' is configured more than once",
                    name
                )));
            }
            exact = Some(cluster);
        } else if cluster.name.eq_ignore_ascii_case(name) && exact_exists(&clusters, name) {
            return Err(Error::Config(format!(
                "cluster names '{}' and '{}' differ only in case",
                name, cluster.name
            )));
        }
    }

    let selected = exact
        .cloned()
        .ok_or_else(|| Error::ClusterNotFound(format!("unknown cluster '{}'", name)))?;
    debug!(cluster = %selected.name, "Selected cluster by header");
    Ok(selected)
}

fn exact_exists(clusters: &[ClusterDetails], name: &str) -> bool {
    clusters.iter().any(|c| c.name == name)
}

fn single_cluster(mut clusters: Vec<ClusterDetails>) -> Result<ClusterDetails> {
    match clusters.len() {
        1 => {
            let cluster = clusters.remove(0);
            debug!(cluster = %cluster.name, "Selected only configured cluster");
            Ok(cluster)
        }
        _ => Err(Error::ClusterNotFound(
            "ambiguous cluster, selector header required".into(),
        )),
    }
}
