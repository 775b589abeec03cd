use serde::{de, Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{DeviceId, DeviceKind, JobId};

/// Inbound channel frame: a flat mapping of field paths to values,
/// e.g. `{"wifi/ssid": "net1", "dev": "buoy"}`.
pub type DeviceFrame = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandVerb {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "CMD")]
    Cmd,
}

/// Outbound device command, carried on the wire as the 3-element array
/// `[verb, item, params]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    pub verb: CommandVerb,
    pub item: String,
    pub params: Vec<Value>,
}

impl DeviceCommand {
    pub fn get(item: impl Into<String>) -> Self {
        Self {
            verb: CommandVerb::Get,
            item: item.into(),
            params: Vec::new(),
        }
    }

    pub fn cmd(item: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            verb: CommandVerb::Cmd,
            item: item.into(),
            params,
        }
    }
}

impl Serialize for DeviceCommand {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        (&self.verb, &self.item, &self.params).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeviceCommand {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let (verb, item, params) = <(CommandVerb, String, Vec<Value>)>::deserialize(deserializer)?;
        Ok(Self { verb, item, params })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeCmd {
    Check,
    Init,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpgradeRequest {
    pub cmd: UpgradeCmd,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub device_type: DeviceKind,
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpgradeResponse {
    #[serde(default)]
    pub job_id: Option<JobId>,
    pub status: JobStatus,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Raw job status as reported by the upgrade service. Known values are
/// 0-11; anything else degrades to the Unknown group instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobStatus(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusGroup {
    /// Job accepted, deploying on the server (0, 1).
    PendingOnServer,
    /// Device upgrade may be triggered (2).
    Ready,
    /// Device upgrading / result reported / server cleaning up (3-6).
    InProgressOnDevice,
    /// Upgrade fully completed (7).
    CompletedOk,
    /// Upgrade failed (8).
    Failed,
    /// No job deployed / none exists (9, 10).
    NoJob,
    /// Backend error, not a job state (11).
    ServerError,
    Unknown,
}

impl StatusGroup {
    /// An upgrade is live on the server or the device; creating another
    /// job now would collide with it.
    pub fn upgrade_live(self) -> bool {
        matches!(
            self,
            StatusGroup::PendingOnServer | StatusGroup::Ready | StatusGroup::InProgressOnDevice
        )
    }

    /// Terminal-ish: nothing further will happen without operator action.
    pub fn settled(self) -> bool {
        matches!(
            self,
            StatusGroup::CompletedOk
                | StatusGroup::Failed
                | StatusGroup::NoJob
                | StatusGroup::ServerError
        )
    }

    /// Statuses from which a fresh job may be requested.
    pub fn allows_new_job(self) -> bool {
        matches!(
            self,
            StatusGroup::CompletedOk | StatusGroup::Failed | StatusGroup::NoJob
        )
    }
}

impl JobStatus {
    pub fn group(self) -> StatusGroup {
        match self.0 {
            0 | 1 => StatusGroup::PendingOnServer,
            2 => StatusGroup::Ready,
            3..=6 => StatusGroup::InProgressOnDevice,
            7 => StatusGroup::CompletedOk,
            8 => StatusGroup::Failed,
            9 | 10 => StatusGroup::NoJob,
            11 => StatusGroup::ServerError,
            _ => StatusGroup::Unknown,
        }
    }

    pub fn progress(self) -> &'static str {
        match self.0 {
            0 => "10%",
            1 => "20%",
            2 => "30%",
            3 => "40%",
            4 | 5 => "80%",
            6 => "90%",
            7 | 8 => "100%",
            9 | 10 => "",
            11 => "Error",
            _ => "Unknown",
        }
    }

    pub fn availability(self) -> &'static str {
        match self.0 {
            0 => "Initializing",
            1 => "Deploying on Server",
            2 => "Yes",
            3 => "Device updating",
            4 => "Device upgrade failed",
            5 => "Device upgrade succeeded",
            6 => "Server Cleanup",
            7 => "Upgrade Completed Successfully",
            8 => "Upgrade Failed",
            9 | 10 => "Upgrade not deployed on Server",
            11 => "Server side Error",
            _ => "Unknown",
        }
    }

    pub fn state_name(self) -> &'static str {
        match self.0 {
            0 => "Initializing",
            1 => "Pending",
            2 => "Ready",
            3 => "Upgrading Device",
            4 => "Upgrade Failed on Device",
            5 => "Upgrade Succeeded on Device",
            6 => "Server Cleanup",
            7 => "Upgrade Succeeded",
            8 => "Upgrade Failed",
            9 => "No Upgrade Available",
            10 => "No Upgrade",
            11 => "Server Error",
            _ => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_command_wire_shape_is_a_three_element_array() {
        let get = DeviceCommand::get("wifi");
        assert_eq!(
            serde_json::to_string(&get).expect("serialize"),
            r#"["GET","wifi",[]]"#
        );

        let cmd = DeviceCommand::cmd(
            "test_new_sta",
            vec![Value::from("net1"), Value::from("secret")],
        );
        assert_eq!(
            serde_json::to_string(&cmd).expect("serialize"),
            r#"["CMD","test_new_sta",["net1","secret"]]"#
        );

        let parsed: DeviceCommand =
            serde_json::from_str(r#"["CMD","send_lora",["hello"]]"#).expect("parse");
        assert_eq!(parsed.verb, CommandVerb::Cmd);
        assert_eq!(parsed.item, "send_lora");
        assert_eq!(parsed.params, vec![Value::from("hello")]);
    }

    #[test]
    fn upgrade_request_omits_unassigned_job_id() {
        let request = UpgradeRequest {
            cmd: UpgradeCmd::Check,
            job_id: None,
            device_type: DeviceKind::Buoy,
            device_id: DeviceId::new("pk0042"),
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["cmd"], "check");
        assert_eq!(json["device_type"], "buoy");
        assert_eq!(json["device_id"], "pk0042");
        assert!(json.get("job_id").is_none());

        let request = UpgradeRequest {
            job_id: Some(JobId(42)),
            ..request
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["job_id"], 42);
    }

    #[test]
    fn upgrade_response_tolerates_missing_optional_fields() {
        let response: UpgradeResponse =
            serde_json::from_str(r#"{"status": 9}"#).expect("parse");
        assert_eq!(response.status, JobStatus(9));
        assert!(response.job_id.is_none());
        assert!(response.errors.is_empty());
    }

    #[test]
    fn status_mapping_is_total_over_known_and_unknown_values() {
        for raw in 0..=11 {
            let status = JobStatus(raw);
            assert_ne!(status.progress(), "Unknown", "status {raw}");
            assert_ne!(status.availability(), "Unknown", "status {raw}");
            assert_ne!(status.group(), StatusGroup::Unknown, "status {raw}");
        }
        for raw in [-1, 12, 99, i32::MAX] {
            let status = JobStatus(raw);
            assert_eq!(status.progress(), "Unknown");
            assert_eq!(status.availability(), "Unknown");
            assert_eq!(status.group(), StatusGroup::Unknown);
        }
        // Identical status always yields identical output.
        assert_eq!(JobStatus(2).progress(), JobStatus(2).progress());
        assert_eq!(JobStatus(2).availability(), "Yes");
    }

    #[test]
    fn status_groups_partition_transition_rules() {
        assert!(JobStatus(0).group().upgrade_live());
        assert!(JobStatus(2).group().upgrade_live());
        assert!(JobStatus(6).group().upgrade_live());
        assert!(!JobStatus(7).group().upgrade_live());

        for raw in 7..=11 {
            assert!(JobStatus(raw).group().settled(), "status {raw}");
        }
        assert!(!JobStatus(3).group().settled());

        for raw in 7..=10 {
            assert!(JobStatus(raw).group().allows_new_job(), "status {raw}");
        }
        assert!(!JobStatus(11).group().allows_new_job());
        assert!(!JobStatus(2).group().allows_new_job());
        assert!(!JobStatus(99).group().allows_new_job());
    }
}
