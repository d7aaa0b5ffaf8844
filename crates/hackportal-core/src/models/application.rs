use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Choice lists for the application form, from `/api/action/applicationEnums`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct ApplicationEnums {
    pub countries: Vec<String>,
    pub ethnicity: Vec<String>,
    pub gender: Vec<String>,
    pub hackathons_attended: Vec<String>,
    pub program_of_study: Vec<String>,
    pub pronouns: Vec<String>,
    pub province: Vec<String>,
    pub requested_workshops: Vec<String>,
    pub school: Vec<String>,
    pub shirt: Vec<String>,
    pub timezone: Vec<String>,
    pub years_of_study: Vec<String>,
}

/// Body of `/api/action/updateapp`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct ApplicationSubmission {
    /// `false` saves a draft, `true` submits for review
    pub submit: bool,
    #[cfg_attr(feature = "ts", ts(type = "unknown"))]
    pub application: Value,
}

/// Body of `/api/action/rsvp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct RsvpRequest {
    pub attending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enums_with_missing_lists() {
        let json = r#"{"school": ["UofT", "Waterloo"], "yearsOfStudy": ["1st"]}"#;
        let enums: ApplicationEnums = serde_json::from_str(json).unwrap();
        assert_eq!(enums.school, vec!["UofT", "Waterloo"]);
        assert_eq!(enums.years_of_study, vec!["1st"]);
        assert!(enums.countries.is_empty());
    }

    #[test]
    fn test_submission_wire_shape() {
        let body = ApplicationSubmission {
            submit: false,
            application: serde_json::json!({"school": "UofT"}),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"submit": false, "application": {"school": "UofT"}}));
    }
}
