//! Peripheral discovery and target selection

use std::time::Duration;

use tracing::{debug, info};

use crate::transport::Transport;
use crate::types::PeripheralHandle;
use crate::{LinkError, Result};

/// Scan for peripherals for `timeout`.
///
/// Results keep the order the radio reported them; they are neither sorted
/// nor deduplicated beyond what the radio does itself.
pub async fn discover<T>(transport: &T, timeout: Duration) -> Result<Vec<PeripheralHandle>>
where
    T: Transport + ?Sized,
{
    info!("Scanning for BLE peripherals ({:?})", timeout);
    let handles = transport.scan(timeout).await?;

    for handle in &handles {
        debug!("Found: {}", handle);
    }
    info!("Scan complete: {} peripheral(s)", handles.len());

    Ok(handles)
}

/// Pick the first handle whose advertised name contains `name_substring`.
///
/// Matching is case-sensitive and follows scan order, so when several
/// peripherals match, the one the radio reported first wins.
pub fn select_target(handles: &[PeripheralHandle], name_substring: &str) -> Result<PeripheralHandle> {
    handles.iter().find(|handle| handle.name_contains(name_substring)).cloned().ok_or_else(|| {
        LinkError::NoMatchingPeripheral {
            pattern: name_substring.to_string(),
            scanned: handles.len(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockTransport;

    fn handles(names: &[Option<&str>]) -> Vec<PeripheralHandle> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| PeripheralHandle::new(*name, format!("00:00:00:00:00:{i:02X}")))
            .collect()
    }

    #[test]
    fn selects_first_match_in_scan_order() {
        let scan = handles(&[Some("Pixel"), Some("MyiPhone"), Some("iPhone-2")]);
        let selected = select_target(&scan, "iPhone").unwrap();
        assert_eq!(selected.name.as_deref(), Some("MyiPhone"));
    }

    #[test]
    fn skips_unnamed_and_is_case_sensitive() {
        let scan = handles(&[None, Some("iphone"), Some("iPhoneBLEPeripheral")]);
        let selected = select_target(&scan, "iPhone").unwrap();
        assert_eq!(selected.address, "00:00:00:00:00:02");
    }

    #[test]
    fn no_match_reports_pattern_and_scan_size() {
        let scan = handles(&[Some("Pixel"), None]);
        match select_target(&scan, "iPhone") {
            Err(LinkError::NoMatchingPeripheral { pattern, scanned }) => {
                assert_eq!(pattern, "iPhone");
                assert_eq!(scanned, 2);
            }
            other => panic!("expected NoMatchingPeripheral, got {other:?}"),
        }
        assert!(select_target(&[], "iPhone").is_err());
    }

    #[tokio::test]
    async fn discover_preserves_radio_order() {
        let scan = handles(&[Some("b"), Some("a"), Some("b")]);
        let transport = MockTransport::new().with_scan(scan.clone());

        let found = discover(&transport, Duration::from_millis(10)).await.unwrap();
        assert_eq!(found, scan);
        assert_eq!(transport.scan_timeouts(), vec![Duration::from_millis(10)]);
    }
}
