use serde::{Deserialize, Serialize};

/// Kind of document a chain or request applies to. Known kinds get their own
/// variant; anything else is carried verbatim as `Custom`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DocumentType {
    Statement,
    Budget,
    Scenario,
    Projection,
    Custom(String),
}

impl DocumentType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Statement => "statement",
            Self::Budget => "budget",
            Self::Scenario => "scenario",
            Self::Projection => "projection",
            Self::Custom(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "statement" => Self::Statement,
            "budget" => Self::Budget,
            "scenario" => Self::Scenario,
            "projection" => Self::Projection,
            _ => Self::Custom(trimmed.to_string()),
        }
    }
}

impl From<String> for DocumentType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<DocumentType> for String {
    fn from(value: DocumentType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::DocumentType;

    #[test]
    fn known_kinds_parse_case_insensitively() {
        assert_eq!(DocumentType::parse(" Budget "), DocumentType::Budget);
        assert_eq!(DocumentType::parse("STATEMENT"), DocumentType::Statement);
    }

    #[test]
    fn unknown_kinds_are_kept_as_custom() {
        let parsed = DocumentType::parse("capex-request");
        assert_eq!(parsed, DocumentType::Custom("capex-request".to_string()));
        assert_eq!(parsed.as_str(), "capex-request");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&DocumentType::Projection).expect("serialize");
        assert_eq!(json, "\"projection\"");

        let decoded: DocumentType = serde_json::from_str("\"scenario\"").expect("deserialize");
        assert_eq!(decoded, DocumentType::Scenario);
    }
}
