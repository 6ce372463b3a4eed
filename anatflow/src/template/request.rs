//! Standard-space template requests.
//!
//! A request names a reference coordinate system plus optional cohort and
//! resolution modifiers. Spec strings are colon-delimited
//! (`MNI152NLin2009cAsym:cohort-1:res-2`) and are parsed exactly once, at
//! configuration time; everything downstream works with the value type.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::TemplateSpecError;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Template identifiers are strictly alphanumeric.
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^[A-Za-z0-9]+$").unwrap()
    })
}

/// A request for registration to one standard space.
///
/// Equality, ordering, and hashing are defined on the normalized
/// `(name, cohort)` pair; the resolution modifier only affects how the
/// resampled outputs are written, never which space the request denotes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRequest {
    /// The template name, e.g. `MNI152NLin2009cAsym`.
    pub name: String,
    /// Optional cohort modifier.
    pub cohort: Option<String>,
    /// Optional resolution modifier.
    pub resolution: Option<String>,
}

impl TemplateRequest {
    /// Creates a request with no modifiers.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cohort: None,
            resolution: None,
        }
    }

    /// Sets the cohort modifier.
    #[must_use]
    pub fn with_cohort(mut self, cohort: impl Into<String>) -> Self {
        self.cohort = Some(cohort.into());
        self
    }

    /// Sets the resolution modifier.
    #[must_use]
    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    /// Returns the normalized `(name, cohort)` key identifying this space.
    ///
    /// This is the key under which transform pairs are stored in the
    /// artifact manifest.
    #[must_use]
    pub fn space_key(&self) -> String {
        match &self.cohort {
            Some(cohort) => format!("{}:cohort-{cohort}", self.name),
            None => self.name.clone(),
        }
    }

    /// A filesystem-safe tag for this space, used in filenames and the
    /// BIDS `from`/`to` transform entities (`MNIInfant+1`).
    #[must_use]
    pub fn file_tag(&self) -> String {
        match &self.cohort {
            Some(cohort) => format!("{}+{cohort}", self.name),
            None => self.name.clone(),
        }
    }
}

impl PartialEq for TemplateRequest {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.cohort == other.cohort
    }
}

impl Eq for TemplateRequest {}

impl std::hash::Hash for TemplateRequest {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.cohort.hash(state);
    }
}

impl PartialOrd for TemplateRequest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TemplateRequest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.name, &self.cohort).cmp(&(&other.name, &other.cohort))
    }
}

impl fmt::Display for TemplateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref cohort) = self.cohort {
            write!(f, ":cohort-{cohort}")?;
        }
        if let Some(ref res) = self.resolution {
            write!(f, ":res-{res}")?;
        }
        Ok(())
    }
}

impl FromStr for TemplateRequest {
    type Err = TemplateSpecError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut parts = spec.split(':');
        let name = parts
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| TemplateSpecError::new(spec, "empty template name"))?;

        if !name_pattern().is_match(name) {
            return Err(TemplateSpecError::new(
                spec,
                format!("template name '{name}' is not alphanumeric"),
            ));
        }

        let mut request = Self::new(name);
        for modifier in parts {
            if let Some(cohort) = modifier.strip_prefix("cohort-") {
                if cohort.is_empty() {
                    return Err(TemplateSpecError::new(spec, "empty cohort modifier"));
                }
                request.cohort = Some(cohort.to_string());
            } else if let Some(res) = modifier.strip_prefix("res-") {
                if res.is_empty() {
                    return Err(TemplateSpecError::new(spec, "empty resolution modifier"));
                }
                request.resolution = Some(res.to_string());
            } else {
                return Err(TemplateSpecError::new(
                    spec,
                    format!("unknown modifier '{modifier}'"),
                ));
            }
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let req: TemplateRequest = "MNI152NLin2009cAsym".parse().unwrap();
        assert_eq!(req.name, "MNI152NLin2009cAsym");
        assert!(req.cohort.is_none());
        assert!(req.resolution.is_none());
    }

    #[test]
    fn test_parse_full_spec() {
        let req: TemplateRequest = "MNIInfant:cohort-1:res-2".parse().unwrap();
        assert_eq!(req.name, "MNIInfant");
        assert_eq!(req.cohort.as_deref(), Some("1"));
        assert_eq!(req.resolution.as_deref(), Some("2"));
    }

    #[test]
    fn test_parse_rejects_unknown_modifier() {
        let result: Result<TemplateRequest, _> = "MNIInfant:den-32k".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_rejects_bad_name() {
        assert!("MNI 152".parse::<TemplateRequest>().is_err());
        assert!("".parse::<TemplateRequest>().is_err());
    }

    #[test]
    fn test_equality_ignores_resolution() {
        let a: TemplateRequest = "MNIInfant:cohort-1:res-2".parse().unwrap();
        let b: TemplateRequest = "MNIInfant:cohort-1".parse().unwrap();
        let c: TemplateRequest = "MNIInfant:cohort-2".parse().unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_space_key() {
        let a: TemplateRequest = "MNIInfant:cohort-1:res-2".parse().unwrap();
        assert_eq!(a.space_key(), "MNIInfant:cohort-1");

        let b = TemplateRequest::new("MNI152NLin6Asym");
        assert_eq!(b.space_key(), "MNI152NLin6Asym");
    }

    #[test]
    fn test_display_round_trip() {
        let spec = "MNIInfant:cohort-1:res-2";
        let req: TemplateRequest = spec.parse().unwrap();
        assert_eq!(req.to_string(), spec);
    }
}
