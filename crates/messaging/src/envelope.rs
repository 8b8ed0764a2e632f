//! Wire envelope shared by the saga command and event topics.

use domain::{DomainError, MessageType, SagaCommand, SagaEvent};
use serde::{Deserialize, Serialize};
use store::OutboxRecord;

/// `{"eventType": <tag>, "payload": <command-or-event>}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event_type: MessageType,
    pub payload: serde_json::Value,
}

/// Same shape with the tag left untyped, so an unknown tag can be told apart
/// from a malformed body.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    event_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Envelope {
    pub fn new(event_type: MessageType, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            payload,
        }
    }

    /// Builds the envelope published for an outbox row.
    pub fn from_outbox(record: &OutboxRecord) -> Self {
        Self::new(record.event_type, record.payload.clone())
    }

    pub fn from_command(command: &SagaCommand) -> Result<Self, DomainError> {
        Ok(Self::new(command.message_type(), command.to_payload()?))
    }

    pub fn from_event(event: &SagaEvent) -> Result<Self, DomainError> {
        Ok(Self::new(event.message_type(), event.to_payload()?))
    }

    /// Parses a wire value.
    ///
    /// Returns [`DomainError::Serialization`] for a body that is not an
    /// envelope and [`DomainError::UnknownVariant`] for an unknown tag.
    pub fn decode(value: &str) -> Result<Self, DomainError> {
        let raw: RawEnvelope = serde_json::from_str(value)?;
        Ok(Self::new(raw.event_type.parse()?, raw.payload))
    }

    pub fn encode(&self) -> Result<String, DomainError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Interprets the payload as a saga command.
    pub fn into_command(self) -> Result<SagaCommand, DomainError> {
        SagaCommand::from_payload(self.event_type, self.payload)
    }

    /// Interprets the payload as a participant reply.
    pub fn into_event(self) -> Result<SagaEvent, DomainError> {
        SagaEvent::from_payload(self.event_type, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, SagaId};
    use domain::OrderCancelled;

    #[test]
    fn encodes_camel_case_tag_and_payload() {
        let envelope = Envelope::new(
            MessageType::OrderCreated,
            serde_json::json!({ "orderId": "x" }),
        );
        let value: serde_json::Value =
            serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["eventType"], "ORDER_CREATED");
        assert_eq!(value["payload"]["orderId"], "x");
    }

    #[test]
    fn decode_distinguishes_unknown_tag_from_malformed_body() {
        let unknown = Envelope::decode(r#"{"eventType":"SHIPMENT_SENT","payload":{}}"#);
        assert!(matches!(unknown, Err(DomainError::UnknownVariant { .. })));

        let malformed = Envelope::decode("not json");
        assert!(matches!(malformed, Err(DomainError::Serialization(_))));
    }

    #[test]
    fn event_survives_the_wire() {
        let event = SagaEvent::OrderCancelled(OrderCancelled {
            saga_id: SagaId::new(),
            order_id: OrderId::new(),
            reason: "Compensation".to_string(),
            timestamp: chrono::Utc::now(),
        });
        let wire = Envelope::from_event(&event).unwrap().encode().unwrap();
        let decoded = Envelope::decode(&wire).unwrap().into_event().unwrap();
        assert_eq!(decoded, event);
    }
}
