//! OCR indexing rules.
//!
//! Each configured rule path names a portal section (and optionally one
//! attachment) as `sectionID=<n>[..attachmentID=<m>]`. The ids are pulled
//! out of the rule once, turned into a scoped glob, and every record path is
//! tested against it. The first matching include rule decides the OCR
//! language; when exclude rules are enabled, any matching exclude rule
//! vetoes OCR.

use std::sync::OnceLock;

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;

use crate::config::{OcrRule, RulesConfig};

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"sectionID=(\d+)").expect("static regex"))
}

fn attachment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"attachmentID=(\d+)").expect("static regex"))
}

/// Section and attachment ids named by a rule path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleScope {
    pub section_id: String,
    pub attachment_id: Option<String>,
}

impl RuleScope {
    /// Extract the scope from a rule path; `None` if it names no section.
    pub fn parse(rule_path: &str) -> Option<Self> {
        let section_id = section_re().captures(rule_path)?.get(1)?.as_str().to_string();
        let attachment_id = attachment_re()
            .captures(rule_path)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        Some(Self {
            section_id,
            attachment_id,
        })
    }

    /// Glob patterns matching any path inside this scope. Each id is
    /// followed either by end of input or a non-digit so `sectionID=1`
    /// does not claim `sectionID=12`.
    pub fn globs(&self) -> Vec<String> {
        let section = format!("*sectionID={}", self.section_id);
        let heads = match &self.attachment_id {
            None => vec![section],
            Some(att) => vec![format!("{}[!0-9]*attachmentID={}", section, att)],
        };
        heads
            .into_iter()
            .flat_map(|head| [head.clone(), format!("{}[!0-9]*", head)])
            .collect()
    }
}

#[derive(Debug)]
struct CompiledRule {
    matcher: GlobSet,
    language: Option<String>,
}

impl CompiledRule {
    fn compile(rule: &OcrRule) -> Result<Self> {
        let Some(scope) = RuleScope::parse(&rule.path) else {
            bail!("OCR rule path '{}' does not contain sectionID=<n>", rule.path);
        };
        let mut builder = GlobSetBuilder::new();
        for pattern in scope.globs() {
            builder.add(Glob::new(&pattern)?);
        }
        Ok(Self {
            matcher: builder.build()?,
            language: rule.language.clone().filter(|l| !l.is_empty()),
        })
    }
}

#[derive(Debug, Default)]
pub struct IndexingRules {
    include: Vec<CompiledRule>,
    exclude: Vec<CompiledRule>,
    exclude_enabled: bool,
}

impl IndexingRules {
    pub fn new(config: &RulesConfig) -> Result<Self> {
        Ok(Self {
            include: config
                .include
                .iter()
                .map(CompiledRule::compile)
                .collect::<Result<_>>()?,
            exclude: config
                .exclude
                .iter()
                .map(CompiledRule::compile)
                .collect::<Result<_>>()?,
            exclude_enabled: config.exclude_enabled,
        })
    }

    /// Decide whether a record path should be sent through OCR and with
    /// which language hint.
    pub fn should_ocr(&self, record_path: &str) -> (bool, Option<String>) {
        if self.exclude_enabled && self.exclude.iter().any(|r| r.matcher.is_match(record_path)) {
            return (false, None);
        }
        self.include
            .iter()
            .find(|r| r.matcher.is_match(record_path))
            .map(|r| (true, r.language.clone()))
            .unwrap_or((false, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(path: &str, language: Option<&str>) -> OcrRule {
        OcrRule {
            path: path.to_string(),
            language: language.map(str::to_string),
        }
    }

    fn rules(include: Vec<OcrRule>, exclude: Vec<OcrRule>, exclude_enabled: bool) -> IndexingRules {
        IndexingRules::new(&RulesConfig {
            include,
            exclude,
            exclude_enabled,
        })
        .unwrap()
    }

    #[test]
    fn parses_section_and_attachment() {
        assert_eq!(
            RuleScope::parse("/Sections/View?sectionID=12&attachmentID=7"),
            Some(RuleScope {
                section_id: "12".into(),
                attachment_id: Some("7".into())
            })
        );
        assert_eq!(
            RuleScope::parse("sectionID=3"),
            Some(RuleScope {
                section_id: "3".into(),
                attachment_id: None
            })
        );
        assert_eq!(RuleScope::parse("/Sections/View?attachmentID=7"), None);
    }

    #[test]
    fn section_rule_matches_any_attachment_in_section() {
        let r = rules(vec![rule("sectionID=12", Some("en"))], vec![], false);
        assert_eq!(
            r.should_ocr("/portal/View?sectionID=12&attachmentID=99"),
            (true, Some("en".to_string()))
        );
        assert_eq!(r.should_ocr("/portal/View?sectionID=12"), (true, Some("en".to_string())));
        assert_eq!(r.should_ocr("/portal/View?sectionID=120"), (false, None));
        assert_eq!(r.should_ocr("/portal/View?sectionID=2"), (false, None));
    }

    #[test]
    fn attachment_rule_is_scoped_to_one_file() {
        let r = rules(vec![rule("sectionID=5&attachmentID=8", None)], vec![], false);
        assert_eq!(r.should_ocr("View?sectionID=5&attachmentID=8"), (true, None));
        assert_eq!(r.should_ocr("View?sectionID=5&attachmentID=81"), (false, None));
        assert_eq!(r.should_ocr("View?sectionID=5&attachmentID=9"), (false, None));
        assert_eq!(r.should_ocr("View?sectionID=6&attachmentID=8"), (false, None));
    }

    #[test]
    fn first_include_match_wins() {
        let r = rules(
            vec![
                rule("sectionID=1&attachmentID=2", Some("zh-Hant")),
                rule("sectionID=1", Some("en")),
            ],
            vec![],
            false,
        );
        assert_eq!(
            r.should_ocr("x?sectionID=1&attachmentID=2"),
            (true, Some("zh-Hant".to_string()))
        );
        assert_eq!(
            r.should_ocr("x?sectionID=1&attachmentID=3"),
            (true, Some("en".to_string()))
        );
    }

    #[test]
    fn exclude_only_applies_when_enabled() {
        let include = vec![rule("sectionID=4", None)];
        let exclude = vec![rule("sectionID=4&attachmentID=1", None)];
        let path = "View?sectionID=4&attachmentID=1";

        let disabled = rules(include.clone(), exclude.clone(), false);
        assert_eq!(disabled.should_ocr(path), (true, None));

        let enabled = rules(include, exclude, true);
        assert_eq!(enabled.should_ocr(path), (false, None));
        assert_eq!(enabled.should_ocr("View?sectionID=4&attachmentID=2"), (true, None));
    }

    #[test]
    fn no_rules_means_no_ocr() {
        let r = IndexingRules::default();
        assert_eq!(r.should_ocr("View?sectionID=1"), (false, None));
    }

    #[test]
    fn empty_language_is_treated_as_none() {
        let r = rules(vec![rule("sectionID=9", Some(""))], vec![], false);
        assert_eq!(r.should_ocr("sectionID=9"), (true, None));
    }

    #[test]
    fn rule_without_section_is_rejected() {
        let err = IndexingRules::new(&RulesConfig {
            include: vec![rule("/no/section/here", None)],
            exclude: vec![],
            exclude_enabled: false,
        })
        .unwrap_err();
        assert!(err.to_string().contains("sectionID"));
    }
}
