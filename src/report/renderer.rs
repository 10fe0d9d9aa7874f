use crate::error::ReportError;
use crate::report::{template_environment, RenderedReport, ReportParams, ReportRenderer};
use log::warn;
use minijinja::Environment;

/// Renders digest subject and body from minijinja template strings.
pub struct TemplateRenderer {
    env: Environment<'static>,
    subject_template: String,
    body_template: String,
}

impl TemplateRenderer {
    /// Create a renderer from template strings.
    ///
    /// The environment uses strict undefined behavior, so a template that
    /// references a variable the flush parameters don't provide fails at
    /// render time rather than silently producing an empty string.
    pub fn new(subject_template: String, body_template: String) -> Self {
        Self {
            env: template_environment(),
            subject_template,
            body_template,
        }
    }
}

impl ReportRenderer for TemplateRenderer {
    fn render(&self, params: &ReportParams) -> Result<RenderedReport, ReportError> {
        let context = serde_json::to_value(params)?;

        let subject = match self.env.render_str(&self.subject_template, &context) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("Failed to render subject template: {}", e);
                return Err(ReportError::RenderError(e));
            }
        };
        let body = match self.env.render_str(&self.body_template, &context) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("Failed to render body template: {}", e);
                return Err(ReportError::RenderError(e));
            }
        };

        // Subjects are single-line by convention; the body is whatever the
        // template produced.
        Ok(RenderedReport {
            subject: subject.trim().to_string(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{
        ReportEntry, ReportField, SourceCount, DEFAULT_BODY_TEMPLATE, DEFAULT_SUBJECT_TEMPLATE,
    };
    use std::collections::BTreeSet;

    fn sample_params() -> ReportParams {
        ReportParams {
            server_name: "aggregator-1".to_string(),
            total: 5,
            total_unique: 2,
            kinds: BTreeSet::from(["app".to_string(), "worker".to_string()]),
            entries: vec![
                ReportEntry {
                    summary: "database connection refused".to_string(),
                    fields: vec![
                        ReportField {
                            name: "module".to_string(),
                            value: "db".to_string(),
                        },
                        ReportField {
                            name: "line".to_string(),
                            value: "42".to_string(),
                        },
                    ],
                    total: 3,
                    sources: vec![
                        SourceCount {
                            name: "host1".to_string(),
                            count: 2,
                        },
                        SourceCount {
                            name: "host2".to_string(),
                            count: 1,
                        },
                    ],
                    first_seen: "2026-08-07 10:00:00 UTC".to_string(),
                    last_seen: "2026-08-07 10:05:00 UTC".to_string(),
                },
                ReportEntry {
                    summary: "timeout talking to cache".to_string(),
                    fields: vec![],
                    total: 2,
                    sources: vec![SourceCount {
                        name: "host1".to_string(),
                        count: 2,
                    }],
                    first_seen: "2026-08-07 10:01:00 UTC".to_string(),
                    last_seen: "2026-08-07 10:02:00 UTC".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_default_subject_renders_totals() {
        let renderer = TemplateRenderer::new(
            DEFAULT_SUBJECT_TEMPLATE.to_string(),
            DEFAULT_BODY_TEMPLATE.to_string(),
        );

        let report = renderer.render(&sample_params()).unwrap();
        assert_eq!(report.subject, "[aggregator-1] 5 errors, 2 unique");
    }

    #[test]
    fn test_default_body_lists_entries_and_sources() {
        let renderer = TemplateRenderer::new(
            DEFAULT_SUBJECT_TEMPLATE.to_string(),
            DEFAULT_BODY_TEMPLATE.to_string(),
        );

        let report = renderer.render(&sample_params()).unwrap();
        assert!(report.body.contains("5 errors (2 unique) were reported on aggregator-1."));
        assert!(report.body.contains("Kinds: app, worker"));
        assert!(report.body.contains("3x database connection refused"));
        assert!(report.body.contains("module: db"));
        assert!(report.body.contains("sources: host1 (2), host2 (1)"));
        assert!(report.body.contains("2x timeout talking to cache"));
        // Most frequent entry comes first.
        let first = report.body.find("3x database").unwrap();
        let second = report.body.find("2x timeout").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_custom_templates() {
        let renderer = TemplateRenderer::new(
            "{{ total }} on {{ server_name }}".to_string(),
            "unique={{ total_unique }}".to_string(),
        );

        let report = renderer.render(&sample_params()).unwrap();
        assert_eq!(report.subject, "5 on aggregator-1");
        assert_eq!(report.body, "unique=2");
    }

    #[test]
    fn test_unclosed_template_is_an_error() {
        let renderer = TemplateRenderer::new(
            "{{ total }".to_string(),
            DEFAULT_BODY_TEMPLATE.to_string(),
        );

        assert!(renderer.render(&sample_params()).is_err());
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let renderer = TemplateRenderer::new(
            "{{ no_such_variable }}".to_string(),
            DEFAULT_BODY_TEMPLATE.to_string(),
        );

        assert!(renderer.render(&sample_params()).is_err());
    }
}
