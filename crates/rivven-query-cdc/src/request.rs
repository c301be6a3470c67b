//! Operation requests and their validation
//!
//! A request names the project the query runs in, the SQL text, the target
//! topic, and the change type stamped on every event. Validation is
//! all-or-nothing and short-circuits on the first failing field, in the
//! order: project, operation, query, topic.

use crate::error::{PipelineError, Result};
use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Expected shape of a topic locator, reported when validation fails
pub const TOPIC_FORMAT: &str = "projects/<projectID>/topics/<topicName>";

/// Parameters of one pipeline run, as received from the CLI or HTTP body
///
/// JSON keys match case-insensitively (`jobProjectId` sets `jobProjectID`),
/// unknown keys are ignored, and `null` leaves a field empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationRequest {
    /// Project the query job is billed to and executed in
    #[serde(rename = "jobProjectID", default)]
    pub job_project_id: String,

    /// SQL text to execute
    #[serde(default)]
    pub query: String,

    /// Fully-qualified topic, e.g. `projects/my-project/topics/my-topic`
    #[serde(rename = "pubsubTopic", default)]
    pub topic: String,

    /// `UPSERT` or `DELETE`, any case
    #[serde(default)]
    pub operation: String,
}

impl OperationRequest {
    pub fn new(
        job_project_id: impl Into<String>,
        query: impl Into<String>,
        topic: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            job_project_id: job_project_id.into(),
            query: query.into(),
            topic: topic.into(),
            operation: operation.into(),
        }
    }

    /// Check every field and return the normalized parameters.
    pub fn validate(&self) -> Result<ValidatedRequest> {
        if self.job_project_id.is_empty() {
            return Err(PipelineError::invalid("jobProjectID must be set"));
        }

        if self.operation.is_empty() {
            return Err(PipelineError::invalid("operation must be set"));
        }
        let change_type = self.operation.parse::<ChangeType>()?;

        if self.query.is_empty() {
            return Err(PipelineError::invalid("query must be set"));
        }

        if self.topic.is_empty() {
            return Err(PipelineError::invalid("topic must be set"));
        }
        let topic = self.topic.parse::<TopicLocator>()?;

        Ok(ValidatedRequest {
            job_project_id: self.job_project_id.clone(),
            query: self.query.clone(),
            topic,
            change_type,
        })
    }
}

impl<'de> Deserialize<'de> for OperationRequest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(RequestVisitor)
    }
}

struct RequestVisitor;

impl<'de> Visitor<'de> for RequestVisitor {
    type Value = OperationRequest;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an operation request object")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<OperationRequest, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut request = OperationRequest::default();
        while let Some(key) = map.next_key::<String>()? {
            let field = match key.to_lowercase().as_str() {
                "jobprojectid" => &mut request.job_project_id,
                "query" => &mut request.query,
                "pubsubtopic" => &mut request.topic,
                "operation" => &mut request.operation,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                    continue;
                }
            };
            if let Some(value) = map.next_value::<Option<String>>()? {
                *field = value;
            }
        }
        Ok(request)
    }

    fn visit_unit<E>(self) -> std::result::Result<OperationRequest, E>
    where
        E: de::Error,
    {
        Ok(OperationRequest::default())
    }
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub job_project_id: String,
    pub query: String,
    pub topic: TopicLocator,
    pub change_type: ChangeType,
}

/// Change-type marker written to `_CHANGE_TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Upsert,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "UPSERT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("UPSERT") {
            Ok(Self::Upsert)
        } else if s.eq_ignore_ascii_case("DELETE") {
            Ok(Self::Delete)
        } else {
            Err(PipelineError::invalid("operation must be UPSERT or DELETE"))
        }
    }
}

/// Four-segment topic locator `<scope>/<projectId>/<kind>/<name>`
///
/// The second segment selects the broker project, the fourth the topic.
/// Segment contents are not checked beyond the count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLocator {
    raw: String,
    project_id: String,
    topic_name: String,
}

impl TopicLocator {
    /// Project the broker connection is scoped to
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Topic name within the project
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for TopicLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for TopicLocator {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split('/').collect();
        if segments.len() != 4 {
            return Err(PipelineError::invalid(format!(
                "topic must have the format {}",
                TOPIC_FORMAT
            )));
        }
        Ok(Self {
            raw: s.to_string(),
            project_id: segments[1].to_string(),
            topic_name: segments[3].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn request() -> OperationRequest {
        OperationRequest::new(
            "billing-project",
            "SELECT id FROM dataset.table",
            "projects/target-project/topics/cdc",
            "upsert",
        )
    }

    fn message(req: OperationRequest) -> String {
        let err = req.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        err.to_string()
    }

    #[test]
    fn test_valid_request() {
        let validated = request().validate().unwrap();
        assert_eq!(validated.job_project_id, "billing-project");
        assert_eq!(validated.change_type, ChangeType::Upsert);
        assert_eq!(validated.topic.project_id(), "target-project");
        assert_eq!(validated.topic.topic_name(), "cdc");
    }

    #[test]
    fn test_missing_fields() {
        let mut req = request();
        req.job_project_id.clear();
        assert_eq!(message(req), "invalid request: jobProjectID must be set");

        let mut req = request();
        req.operation.clear();
        assert_eq!(message(req), "invalid request: operation must be set");

        let mut req = request();
        req.query.clear();
        assert_eq!(message(req), "invalid request: query must be set");

        let mut req = request();
        req.topic.clear();
        assert_eq!(message(req), "invalid request: topic must be set");
    }

    #[test]
    fn test_first_failure_wins() {
        let req = OperationRequest::default();
        assert_eq!(message(req), "invalid request: jobProjectID must be set");

        let req = OperationRequest::new("p", "", "a/b/c", "MERGE");
        assert_eq!(
            message(req),
            "invalid request: operation must be UPSERT or DELETE"
        );
    }

    #[test]
    fn test_topic_segment_count() {
        for topic in ["a/b/c", "a/b/c/d/e", "topic", "/"] {
            let mut req = request();
            req.topic = topic.to_string();
            let msg = message(req);
            assert!(msg.contains(TOPIC_FORMAT), "{topic}: {msg}");
        }

        let locator: TopicLocator = "x/p/y/t".parse().unwrap();
        assert_eq!(locator.project_id(), "p");
        assert_eq!(locator.topic_name(), "t");
        assert_eq!(locator.to_string(), "x/p/y/t");
    }

    #[test]
    fn test_change_type_case_insensitive() {
        for op in ["upsert", "UPSERT", "Upsert", "uPsErT"] {
            assert_eq!(op.parse::<ChangeType>().unwrap(), ChangeType::Upsert);
        }
        for op in ["delete", "DELETE", "Delete"] {
            assert_eq!(op.parse::<ChangeType>().unwrap(), ChangeType::Delete);
        }
        assert!("insert".parse::<ChangeType>().is_err());
        assert!(" upsert".parse::<ChangeType>().is_err());
    }

    #[test]
    fn test_request_json_field_names() {
        let req: OperationRequest = serde_json::from_str(
            r#"{"jobProjectID":"p","query":"SELECT 1","pubsubTopic":"projects/p/topics/t","operation":"DELETE"}"#,
        )
        .unwrap();
        assert_eq!(req.job_project_id, "p");
        assert_eq!(req.topic, "projects/p/topics/t");
        assert_eq!(req.operation, "DELETE");

        let req: OperationRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, OperationRequest::default());
    }

    #[test]
    fn test_request_json_keys_ignore_case() {
        let req: OperationRequest = serde_json::from_str(
            r#"{"jobProjectId":"p","QUERY":"SELECT 1","PubsubTopic":"projects/p/topics/t","Operation":"upsert"}"#,
        )
        .unwrap();
        assert_eq!(
            req,
            OperationRequest::new("p", "SELECT 1", "projects/p/topics/t", "upsert")
        );
    }

    #[test]
    fn test_request_json_lenient_fields() {
        // Unknown keys are skipped, null keeps the default, the last duplicate wins
        let req: OperationRequest = serde_json::from_str(
            r#"{"dryRun":true,"extra":{"a":[1]},"query":null,"operation":"DELETE","OPERATION":"UPSERT"}"#,
        )
        .unwrap();
        assert!(req.query.is_empty());
        assert_eq!(req.operation, "UPSERT");

        let req: OperationRequest = serde_json::from_str("null").unwrap();
        assert_eq!(req, OperationRequest::default());

        assert!(serde_json::from_str::<OperationRequest>(r#"{"query":42}"#).is_err());
        assert!(serde_json::from_str::<OperationRequest>("[]").is_err());
    }
}
