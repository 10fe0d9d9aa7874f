use crate::config::Config;
use crate::records::{FieldValue, Fingerprint};
use log::debug;
use std::collections::BTreeSet;

/// Substring markers identifying intentional monitoring errors.
///
/// Deployments inject errors carrying one of these markers to verify that
/// their systems are correctly reporting into the daemon; such messages are
/// excluded from the paging rate and routed to the monitoring recipient.
#[derive(Debug, Clone, Default)]
pub struct MarkerSet {
    markers: Vec<String>,
}

impl MarkerSet {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    /// True if any marker appears in the fingerprint's message or detail
    /// text. Absent fields never match.
    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        self.markers.iter().any(|marker| {
            field_contains(fingerprint.message(), marker)
                || field_contains(fingerprint.detail(), marker)
        })
    }
}

fn field_contains(value: Option<&FieldValue>, marker: &str) -> bool {
    match value {
        Some(value) if !value.is_absent() => value.to_string().contains(marker),
        _ => false,
    }
}

/// Which fingerprints a routing rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMatch {
    /// Intentional monitoring errors (a marker is present)
    MarkerPresent,
    /// Real errors (no marker present)
    MarkerAbsent,
}

/// One routing rule: who hears about matching fingerprints.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub recipient: String,
    pub matches: RouteMatch,
}

/// Ordered routing rules evaluated over a flushed batch of fingerprints.
///
/// Errors are not split into separate digests: if a recipient matches *any*
/// fingerprint in the batch, the recipient is added to the digest and sees
/// all of them. A fingerprint satisfying several rules contributes several
/// recipients.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    markers: MarkerSet,
    rules: Vec<RoutingRule>,
}

impl RoutingTable {
    pub fn new(markers: MarkerSet, rules: Vec<RoutingRule>) -> Self {
        Self { markers, rules }
    }

    /// Build the default two-rule table from configuration: marker-present
    /// fingerprints go to the monitoring recipient, everything else to the
    /// primary report recipient. Rules with no configured recipient are
    /// omitted.
    pub fn from_config(config: &Config) -> Self {
        let mut rules = Vec::new();
        if let Some(monitoring_to) = &config.report.monitoring_report_to {
            if !monitoring_to.is_empty() {
                rules.push(RoutingRule {
                    recipient: monitoring_to.clone(),
                    matches: RouteMatch::MarkerPresent,
                });
            }
        }
        if !config.report.report_to.is_empty() {
            rules.push(RoutingRule {
                recipient: config.report.report_to.clone(),
                matches: RouteMatch::MarkerAbsent,
            });
        }
        Self::new(MarkerSet::new(config.markers.monitoring.clone()), rules)
    }

    /// The marker set this table classifies with.
    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// Recipients for one flushed batch, deduplicated and sorted.
    ///
    /// May be empty; the digest dispatch substitutes the fallback recipient
    /// rather than silently dropping the report.
    pub fn recipients(&self, fingerprints: &[Fingerprint]) -> Vec<String> {
        let mut recipients = BTreeSet::new();
        for fingerprint in fingerprints {
            for rule in &self.rules {
                let matched = match rule.matches {
                    RouteMatch::MarkerPresent => self.markers.matches(fingerprint),
                    RouteMatch::MarkerAbsent => !self.markers.matches(fingerprint),
                };
                if matched {
                    debug!(
                        "Matched {:?}, adding recipient {}",
                        rule.matches, rule.recipient
                    );
                    recipients.insert(rule.recipient.clone());
                }
            }
        }
        recipients.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{FieldValue, FingerprintSchema};
    use std::sync::Arc;

    const MARKER: &str = "5f64c8ec-225f-4b7a-9c1f-3d6b0f50c061";

    fn fingerprint(message: &str, detail: &str) -> Fingerprint {
        let schema = Arc::new(FingerprintSchema::default());
        Fingerprint::new(
            Arc::clone(&schema),
            vec![
                FieldValue::Text("test".to_string()),
                FieldValue::Text("test".to_string()),
                FieldValue::Text("test.rs".to_string()),
                FieldValue::Text(message.to_string()),
                FieldValue::Text("/srv/test.rs".to_string()),
                FieldValue::Int(1),
                FieldValue::Text(detail.to_string()),
                FieldValue::Text("app".to_string()),
            ],
        )
    }

    fn table() -> RoutingTable {
        RoutingTable::new(
            MarkerSet::new(vec![MARKER.to_string()]),
            vec![
                RoutingRule {
                    recipient: "canary@example.com".to_string(),
                    matches: RouteMatch::MarkerPresent,
                },
                RoutingRule {
                    recipient: "errors@example.com".to_string(),
                    matches: RouteMatch::MarkerAbsent,
                },
            ],
        )
    }

    #[test]
    fn test_marker_matches_message_or_detail() {
        let markers = MarkerSet::new(vec![MARKER.to_string()]);

        assert!(markers.matches(&fingerprint(
            &format!("It's {}", MARKER),
            "exception text"
        )));
        assert!(markers.matches(&fingerprint(
            "message text",
            &format!("Oh, and {} is good too", MARKER)
        )));
        assert!(!markers.matches(&fingerprint(
            "This is just a regular message",
            "exception text"
        )));
    }

    #[test]
    fn test_absent_fields_never_match() {
        let markers = MarkerSet::new(vec![MARKER.to_string()]);
        let schema = Arc::new(FingerprintSchema::default());
        let all_absent = Fingerprint::new(
            Arc::clone(&schema),
            vec![FieldValue::Absent; 8],
        );
        assert!(!markers.matches(&all_absent));
    }

    #[test]
    fn test_marked_and_unmarked_messages_route_separately() {
        let table = table();

        let marked = fingerprint(&format!("Oho, {}", MARKER), "exception text");
        assert_eq!(
            table.recipients(&[marked.clone()]),
            vec!["canary@example.com".to_string()]
        );

        let unmarked = fingerprint("This is a real actual error (sorta)", "exception text");
        assert_eq!(
            table.recipients(&[unmarked.clone()]),
            vec!["errors@example.com".to_string()]
        );

        // A batch with both yields both recipients, deduplicated.
        let recipients = table.recipients(&[marked, unmarked]);
        assert_eq!(
            recipients,
            vec![
                "canary@example.com".to_string(),
                "errors@example.com".to_string()
            ]
        );
    }

    #[test]
    fn test_empty_batch_yields_no_recipients() {
        assert!(table().recipients(&[]).is_empty());
    }

    #[test]
    fn test_recipients_are_deduplicated() {
        let table = table();
        let first = fingerprint("error one", "detail");
        let second = fingerprint("error two", "detail");

        let recipients = table.recipients(&[first, second]);
        assert_eq!(recipients, vec!["errors@example.com".to_string()]);
    }

    #[test]
    fn test_from_config_skips_unset_monitoring_recipient() {
        let mut config = Config::default();
        config.report.report_to = "errors@example.com".to_string();
        config.report.monitoring_report_to = None;

        let table = RoutingTable::from_config(&config);
        let marked = fingerprint(
            &format!("marked {}", config.markers.monitoring[0]),
            "detail",
        );
        // No monitoring rule: a marked-only batch routes nowhere, and the
        // dispatch-time fallback takes over.
        assert!(table.recipients(&[marked]).is_empty());
    }
}
