//! OMCI requests and responses as seen by tasks.
//!
//! These are decoded frames: the wire format belongs to the transport.

use crate::error::{SyncError, SyncResult};
use omci_codec::{AlarmBitmap, AttributeMap};
use omci_core::MessageType;
use std::fmt;

/// A request sent to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum OmciRequest {
    /// Reset the device MIB and its data sync counter.
    MibReset,
    /// Start a MIB upload.
    MibUpload,
    /// Fetch one upload entry.
    MibUploadNext {
        /// Zero-based entry index.
        sequence: u16,
    },
    /// Read attributes.
    Get {
        /// ME class.
        class_id: u16,
        /// ME instance.
        instance_id: u16,
        /// Attribute names.
        attributes: Vec<String>,
    },
    /// Write attributes.
    Set {
        /// ME class.
        class_id: u16,
        /// ME instance.
        instance_id: u16,
        /// New values.
        attributes: AttributeMap,
    },
    /// Create an instance.
    Create {
        /// ME class.
        class_id: u16,
        /// ME instance.
        instance_id: u16,
        /// Set-by-create values.
        attributes: AttributeMap,
    },
    /// Delete an instance.
    Delete {
        /// ME class.
        class_id: u16,
        /// ME instance.
        instance_id: u16,
    },
    /// Snapshot the alarm table and reset the alarm sequence.
    GetAllAlarms,
    /// Fetch one alarm table entry.
    GetAllAlarmsNext {
        /// Zero-based entry index.
        sequence: u16,
    },
}

impl OmciRequest {
    /// Builds a get request.
    pub fn get(class_id: u16, instance_id: u16, attributes: &[&str]) -> Self {
        Self::Get {
            class_id,
            instance_id,
            attributes: attributes.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// Builds a set request.
    pub fn set(class_id: u16, instance_id: u16, attributes: AttributeMap) -> Self {
        Self::Set {
            class_id,
            instance_id,
            attributes,
        }
    }

    /// Builds a create request.
    pub fn create(class_id: u16, instance_id: u16, attributes: AttributeMap) -> Self {
        Self::Create {
            class_id,
            instance_id,
            attributes,
        }
    }

    /// Builds a delete request.
    pub fn delete(class_id: u16, instance_id: u16) -> Self {
        Self::Delete {
            class_id,
            instance_id,
        }
    }

    /// Returns the OMCI message type of this request.
    pub fn message_type(&self) -> MessageType {
        match self {
            OmciRequest::MibReset => MessageType::MibReset,
            OmciRequest::MibUpload => MessageType::MibUpload,
            OmciRequest::MibUploadNext { .. } => MessageType::MibUploadNext,
            OmciRequest::Get { .. } => MessageType::Get,
            OmciRequest::Set { .. } => MessageType::Set,
            OmciRequest::Create { .. } => MessageType::Create,
            OmciRequest::Delete { .. } => MessageType::Delete,
            OmciRequest::GetAllAlarms => MessageType::GetAllAlarms,
            OmciRequest::GetAllAlarmsNext { .. } => MessageType::GetAllAlarmsNext,
        }
    }

    /// Returns true if a successful response changes the device MIB data sync.
    pub fn bumps_mib_data_sync(&self) -> bool {
        matches!(
            self,
            OmciRequest::Set { .. } | OmciRequest::Create { .. } | OmciRequest::Delete { .. }
        )
    }
}

/// OMCI result reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Command processed successfully.
    Success,
    /// Command processing error.
    ProcessingError,
    /// Command not supported.
    NotSupported,
    /// Parameter error.
    ParameterError,
    /// Unknown managed entity.
    UnknownEntity,
    /// Unknown managed entity instance.
    UnknownInstance,
    /// Device busy.
    DeviceBusy,
    /// Instance already exists.
    InstanceExists,
    /// Some attributes failed.
    AttributeFailure,
}

impl ResultCode {
    /// Wire value of the code.
    pub const fn code(self) -> u8 {
        match self {
            ResultCode::Success => 0,
            ResultCode::ProcessingError => 1,
            ResultCode::NotSupported => 2,
            ResultCode::ParameterError => 3,
            ResultCode::UnknownEntity => 4,
            ResultCode::UnknownInstance => 5,
            ResultCode::DeviceBusy => 6,
            ResultCode::InstanceExists => 7,
            ResultCode::AttributeFailure => 9,
        }
    }

    /// Parses a wire value.
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => ResultCode::Success,
            1 => ResultCode::ProcessingError,
            2 => ResultCode::NotSupported,
            3 => ResultCode::ParameterError,
            4 => ResultCode::UnknownEntity,
            5 => ResultCode::UnknownInstance,
            6 => ResultCode::DeviceBusy,
            7 => ResultCode::InstanceExists,
            9 => ResultCode::AttributeFailure,
            _ => return None,
        })
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", self.code())
    }
}

/// Data carried by a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// No data.
    None,
    /// Number of upload-next commands needed.
    MibUpload {
        /// Entry count.
        commands: u16,
    },
    /// One uploaded instance.
    MibUploadNext {
        /// ME class.
        class_id: u16,
        /// ME instance.
        instance_id: u16,
        /// Uploaded attributes.
        attributes: AttributeMap,
    },
    /// Attributes returned by a get.
    Attributes(AttributeMap),
    /// Number of get-all-alarms-next commands needed.
    GetAllAlarms {
        /// Entry count.
        commands: u16,
    },
    /// One alarm table entry.
    GetAllAlarmsNext {
        /// ME class.
        class_id: u16,
        /// ME instance.
        instance_id: u16,
        /// Active alarms.
        bitmap: AlarmBitmap,
    },
}

/// A response received from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct OmciResponse {
    /// Reason code.
    pub result: ResultCode,
    /// Response data.
    pub payload: ResponsePayload,
}

impl OmciResponse {
    /// A successful response with `payload`.
    pub fn success(payload: ResponsePayload) -> Self {
        Self {
            result: ResultCode::Success,
            payload,
        }
    }

    /// A successful response without data.
    pub fn ok() -> Self {
        Self::success(ResponsePayload::None)
    }

    /// A failed response.
    pub fn failed(result: ResultCode) -> Self {
        Self {
            result,
            payload: ResponsePayload::None,
        }
    }

    /// Returns true if the device reported success.
    pub fn is_success(&self) -> bool {
        self.result == ResultCode::Success
    }

    /// Returns the payload of a successful response.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CommandFailed`] if the device reported an error.
    pub fn into_payload(self) -> SyncResult<ResponsePayload> {
        if self.is_success() {
            Ok(self.payload)
        } else {
            Err(SyncError::command_failed(self.result.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_code_round_trip() {
        for code in 0..=10u8 {
            if let Some(result) = ResultCode::from_code(code) {
                assert_eq!(result.code(), code);
            }
        }
        assert!(ResultCode::from_code(8).is_none());
    }

    #[test]
    fn failed_response_is_error() {
        let err = OmciResponse::failed(ResultCode::UnknownInstance)
            .into_payload()
            .unwrap_err();
        assert!(matches!(err, SyncError::CommandFailed { .. }));
        assert!(err.to_string().contains("UnknownInstance"));
    }

    #[test]
    fn config_changes_bump_mds() {
        assert!(OmciRequest::delete(11, 257).bumps_mib_data_sync());
        assert!(!OmciRequest::get(2, 0, &["mib_data_sync"]).bumps_mib_data_sync());
        assert_eq!(OmciRequest::MibUpload.message_type(), MessageType::MibUpload);
    }
}
