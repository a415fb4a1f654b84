//! Director task models.

use chrono::{DateTime, Utc};
use cumulus_core::Error;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::Result;

/// Link to another entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    /// Entity URL.
    pub href: String,
    /// Entity media type.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Entity name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Entity URN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Reference {
    /// Create a reference to `href`.
    #[must_use]
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            media_type: None,
            name: None,
            id: None,
        }
    }

    /// Set the media type.
    #[must_use]
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Set the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Identifier of the referenced entity: the last segment of its href.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the href is not a URL or has no path.
    pub fn entity_id(&self) -> Result<String> {
        let url = Url::parse(&self.href)
            .map_err(|err| Error::InvalidRequest(format!("Invalid href `{}`: {err}", self.href)))?;
        url.path_segments()
            .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidRequest(format!("href `{}` names no entity", self.href)))
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Waiting to start
    Queued,
    /// Waiting for approval
    PreRunning,
    /// In progress
    Running,
    /// Finished successfully
    Success,
    /// Finished with an error
    Error,
    /// Cancelled by a user
    Canceled,
    /// Aborted by an administrator
    Aborted,
    /// Status this client does not know
    #[serde(other)]
    Unrecognized,
}

impl TaskStatus {
    /// Whether the task will not change state again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Error | Self::Canceled | Self::Aborted
        )
    }
}

/// Long-running operation tracked by the director.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task URL.
    pub href: String,
    /// Task media type.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Task name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Task URN, e.g. `urn:vcloud:task:5fcd2af3-...`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Current status.
    pub status: TaskStatus,
    /// Human readable description of the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Machine readable operation name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Start timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// End timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// When the task record expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<DateTime<Utc>>,
    /// Entity the task operates on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Reference>,
    /// User who started the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Reference>,
    /// Organization the task belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<Reference>,
    /// Failure details of a task in [`TaskStatus::Error`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DirectorError>,
}

impl Task {
    /// Reference pointing at this task.
    #[must_use]
    pub fn reference(&self) -> Reference {
        Reference {
            href: self.href.clone(),
            media_type: self.media_type.clone(),
            name: self.name.clone(),
            id: self.id.clone(),
        }
    }
}

/// Tasks of one organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TasksList {
    /// List URL.
    pub href: String,
    /// List media type.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// List name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tasks in the list.
    #[serde(default, rename = "task")]
    pub tasks: Vec<Task>,
}

/// Error object returned by the director for failed requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirectorError {
    /// Error message.
    pub message: String,
    /// HTTP status the director associates with the error.
    pub major_error_code: u16,
    /// Director specific error code, e.g. `BAD_REQUEST`.
    pub minor_error_code: String,
    /// Vendor specific error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_specific_error_code: Option<String>,
    /// Server side stack trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl DirectorError {
    /// Director error carried by `err`, if it carries one.
    #[must_use]
    pub fn from_error(err: &Error) -> Option<Self> {
        err.provider_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_id_is_last_href_segment() {
        let org = Reference::new(
            "https://vcloud.example.com/api/org/6f312e42-cd2b-488d-a2bb-97519cd57ed0",
        );
        assert_eq!(
            org.entity_id().unwrap(),
            "6f312e42-cd2b-488d-a2bb-97519cd57ed0"
        );
        assert_eq!(
            Reference::new("https://vcloud.example.com/api/task/abc/").entity_id().unwrap(),
            "abc"
        );
        assert!(Reference::new("https://vcloud.example.com").entity_id().is_err());
        assert!(Reference::new("not a url").entity_id().is_err());
    }

    #[test]
    fn task_parses_offsets_and_unknown_status() {
        let task: Task = serde_json::from_value(json!({
            "type": "application/vnd.vmware.vcloud.task+json",
            "href": "https://vcloud.example.com/api/task/1",
            "status": "success",
            "operationName": "catalogCreateCatalog",
            "startTime": "2012-02-07T00:16:28.450-05:00"
        }))
        .unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert!(task.status.is_terminal());
        assert_eq!(
            task.start_time.unwrap(),
            "2012-02-07T05:16:28.450Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(task.reference().entity_id().unwrap(), "1");

        let status: TaskStatus = serde_json::from_value(json!("suspended")).unwrap();
        assert_eq!(status, TaskStatus::Unrecognized);
        assert!(!TaskStatus::PreRunning.is_terminal());
    }

    #[test]
    fn director_error_from_provider_error() {
        let err = Error::ProviderError {
            status: 400,
            error: json!({
                "message": "validation error on field 'id'",
                "majorErrorCode": 400,
                "minorErrorCode": "BAD_REQUEST"
            }),
        };
        let decoded = DirectorError::from_error(&err).unwrap();
        assert_eq!(decoded.minor_error_code, "BAD_REQUEST");
        assert_eq!(decoded.major_error_code, 400);

        assert!(DirectorError::from_error(&Error::Timeout("slow".to_string())).is_none());
    }
}
