use std::collections::BTreeMap;

use crate::runtime::block_on;

/// Parses a comma separated `key:value` node selector list.
/// Whitespace around keys and values is trimmed; an empty input yields an
/// empty map; a pair missing either side is an error.
pub fn parse_node_selector(raw: &str) -> Result<BTreeMap<String, String>, String> {
    let mut selector = BTreeMap::new();
    if raw.trim().is_empty() {
        return Ok(selector);
    }

    for pair in raw.split(',') {
        let mut parts = pair.splitn(2, ':');
        let key = parts.next().unwrap_or_default().trim();
        let value = parts.next().unwrap_or_default().trim();
        if key.is_empty() || value.is_empty() {
            return Err(format!("malformed node selector pair {pair:?}, expected key:value"));
        }
        selector.insert(key.to_string(), value.to_string());
    }

    Ok(selector)
}

/// Builds a kube client from the in-cluster environment, or from the local
/// kubeconfig when running on a workstation.
pub fn create_kube_client() -> Result<kube::Client, kube::Error> {
    let client = block_on(kube::Client::try_default())?;

    // Contact the api server once to verify we are correctly connected
    block_on(client.apiserver_version())?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::parse_node_selector;

    #[test]
    fn test_parse_node_selector_pairs() {
        let selector = parse_node_selector("a:1,b:2").expect("valid selector");
        assert_eq!(selector.len(), 2);
        assert_eq!(selector.get("a").map(String::as_str), Some("1"));
        assert_eq!(selector.get("b").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_parse_node_selector_trims_whitespace() {
        let selector = parse_node_selector(" pool : builder , arch : amd64 ").expect("valid selector");
        assert_eq!(selector.get("pool").map(String::as_str), Some("builder"));
        assert_eq!(selector.get("arch").map(String::as_str), Some("amd64"));
    }

    #[test]
    fn test_parse_node_selector_empty_is_empty_map() {
        let selector = parse_node_selector("").expect("empty selector");
        assert!(selector.is_empty());
    }

    #[test]
    fn test_parse_node_selector_rejects_missing_value() {
        assert!(parse_node_selector("a:1,b").is_err());
        assert!(parse_node_selector("a:").is_err());
        assert!(parse_node_selector(":1").is_err());
    }
}
