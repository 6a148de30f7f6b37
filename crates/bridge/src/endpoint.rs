//! Candidate addresses for a port inside a container.

use kennel_runtime::ContainerInfo;

/// Base URLs for `container_port`, most likely reachable first.
///
/// From inside the shared network the container address answers directly;
/// from the host only the loopback-published port does. Recomputed from live
/// inspect data on every call since both change across restarts.
pub fn candidate_urls(info: &ContainerInfo, container_port: u16, in_network: bool) -> Vec<String> {
    let direct = info
        .ip
        .as_deref()
        .filter(|ip| !ip.is_empty())
        .map(|ip| format!("http://{ip}:{container_port}"));
    let mapped = info
        .host_port(container_port)
        .map(|port| format!("http://127.0.0.1:{port}"));

    let ordered = if in_network {
        [direct, mapped]
    } else {
        [mapped, direct]
    };

    let mut urls: Vec<String> = Vec::with_capacity(2);
    for url in ordered.into_iter().flatten() {
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        kennel_runtime::ContainerState,
        rstest::rstest,
        std::collections::HashMap,
    };

    fn info(ip: Option<&str>, mapped: Option<u16>) -> ContainerInfo {
        ContainerInfo {
            id: "c1".into(),
            name: "kennel-a".into(),
            state: ContainerState::Running,
            ip: ip.map(Into::into),
            ports: mapped.map(|p| (18790, p)).into_iter().collect::<HashMap<_, _>>(),
        }
    }

    #[rstest]
    #[case(true, &["http://172.30.0.5:18790", "http://127.0.0.1:41000"])]
    #[case(false, &["http://127.0.0.1:41000", "http://172.30.0.5:18790"])]
    fn order_follows_placement(#[case] in_network: bool, #[case] expected: &[&str]) {
        let urls = candidate_urls(&info(Some("172.30.0.5"), Some(41000)), 18790, in_network);
        assert_eq!(urls, expected);
    }

    #[test]
    fn missing_pieces_are_skipped() {
        assert_eq!(
            candidate_urls(&info(None, Some(41000)), 18790, true),
            vec!["http://127.0.0.1:41000"]
        );
        assert_eq!(
            candidate_urls(&info(Some(""), None), 18790, false),
            Vec::<String>::new()
        );
    }

    #[test]
    fn duplicates_collapse() {
        let urls = candidate_urls(&info(Some("127.0.0.1"), Some(18790)), 18790, true);
        assert_eq!(urls, vec!["http://127.0.0.1:18790"]);
    }
}
