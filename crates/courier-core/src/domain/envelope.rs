//! JobEnvelope: the unit carried by the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::CourierError;
use super::ids::JobId;

/// A job id plus an opaque reference to the work input.
///
/// The core never looks inside `payload`; only the worker's processor does.
/// Envelopes are built once by the submitter and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    #[serde(alias = "id")]
    job_id: JobId,

    payload: serde_json::Value,

    /// When the submitter built the envelope.
    #[serde(default = "Utc::now")]
    enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    pub fn new(job_id: JobId, payload: serde_json::Value) -> Self {
        Self {
            job_id,
            payload,
            enqueued_at: Utc::now(),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn encode(&self) -> Result<Vec<u8>, CourierError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CourierError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ulid::Ulid;

    #[test]
    fn payload_survives_the_wire() {
        let payload = json!({
            "image_name": "0a1b2c.jpeg",
            "nested": {"list": [1, 2.5, -3, null, true], "text": "ünïcode"},
        });
        let env = JobEnvelope::new(JobId::from_ulid(Ulid::new()), payload.clone());

        let bytes = env.encode().unwrap();
        let back = JobEnvelope::decode(&bytes).unwrap();

        assert_eq!(back, env);
        assert_eq!(back.payload(), &payload);
    }

    #[test]
    fn decode_accepts_legacy_id_field() {
        let ulid = Ulid::new();
        let raw = format!(r#"{{"id":"{ulid}","payload":"dog.jpeg"}}"#);

        let env = JobEnvelope::decode(raw.as_bytes()).unwrap();

        assert_eq!(env.job_id(), JobId::from_ulid(ulid));
        assert_eq!(env.payload(), &json!("dog.jpeg"));
    }

    #[test]
    fn decode_rejects_missing_job_id() {
        let err = JobEnvelope::decode(br#"{"payload":1}"#).unwrap_err();
        assert!(matches!(err, CourierError::Codec(_)));
    }

    #[test]
    fn wire_shape_uses_job_id_field_name() {
        let env = JobEnvelope::new(JobId::from_ulid(Ulid::new()), json!("cat.jpg"));
        let v: serde_json::Value = serde_json::from_slice(&env.encode().unwrap()).unwrap();
        assert_eq!(v["job_id"], json!(env.job_id().to_string()));
        assert_eq!(v["payload"], json!("cat.jpg"));
    }
}
