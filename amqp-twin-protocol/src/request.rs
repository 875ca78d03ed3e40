//! Twin request encoding: `send_twin_request`'s wire-format half, split out so it is
//! testable without a running [`crate::TwinClientHandle`].

use amqp_twin_types::{AmqpMessage, AmqpValue, TwinError};
use indexmap::IndexMap;

use crate::config::DESIRED_PROPERTIES_RESOURCE;

/// The `$rid` property key, renamed to [`amqp_twin_types::message::MessageProperties::correlation_id`]
/// rather than carried in `applicationProperties` like every other property.
const REQUEST_ID_KEY: &str = "$rid";

/// Encodes a twin request as an [`AmqpMessage`].
///
/// Non-string/non-scalar properties and non-string method/resource are unrepresentable by
/// this function's types (the AMQP variant's "argument error" checks collapse to Rust's
/// type system); what remains to validate is falsiness, per the AMQP variant.
pub fn encode_twin_request(
    method: &str,
    resource: &str,
    properties: &IndexMap<String, AmqpValue>,
    body: &str,
) -> Result<AmqpMessage, TwinError> {
    if method.is_empty() {
        return Err(TwinError::Reference("method".to_string()));
    }
    if resource.is_empty() {
        return Err(TwinError::Reference("resource".to_string()));
    }
    if body.is_empty() {
        return Err(TwinError::Reference("body".to_string()));
    }

    let mut message = AmqpMessage::with_body(body);
    message
        .message_annotations
        .insert("operation".to_string(), AmqpValue::from(method));

    if let Some(trimmed) = trim_resource(resource) {
        message
            .message_annotations
            .insert("resource".to_string(), AmqpValue::from(trimmed));
    }

    if method == "PATCH" {
        message
            .message_annotations
            .insert("version".to_string(), AmqpValue::Null);
    }

    for (key, value) in properties {
        if key == REQUEST_ID_KEY {
            message.properties.correlation_id = Some(value.to_string());
        } else {
            message.application_properties.insert(key.clone(), value.clone());
        }
    }

    Ok(message)
}

/// Builds the `PUT`/`DELETE` request used to (un)subscribe to desired-property
/// notifications, with a fresh `$rid`.
pub fn encode_notification_subscription_request(
    method: &str,
    correlation_id: &str,
) -> AmqpMessage {
    let mut properties = IndexMap::new();
    properties.insert(REQUEST_ID_KEY.to_string(), AmqpValue::from(correlation_id));
    encode_twin_request(method, DESIRED_PROPERTIES_RESOURCE, &properties, " ")
        .expect("method/resource/body are always non-empty here")
}

/// Trims a single trailing `/` from `resource`, returning `None` if the result is empty
/// (the `resource` annotation is then omitted entirely, per the AMQP variant).
fn trim_resource(resource: &str) -> Option<&str> {
    let trimmed = resource.strip_suffix('/').unwrap_or(resource);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_request_sets_null_version_and_maps_rid_to_correlation_id() {
        let mut properties = IndexMap::new();
        properties.insert("$rid".to_string(), AmqpValue::from("7"));

        let message =
            encode_twin_request("PATCH", "/properties/reported/", &properties, "{}").unwrap();

        assert_eq!(
            message.message_annotations.get("operation"),
            Some(&AmqpValue::from("PATCH"))
        );
        assert_eq!(
            message.message_annotations.get("resource"),
            Some(&AmqpValue::from("/properties/reported"))
        );
        assert_eq!(message.message_annotations.get("version"), Some(&AmqpValue::Null));
        assert_eq!(message.properties.correlation_id.as_deref(), Some("7"));
        assert_eq!(message.body.unwrap().as_str(), Some("{}"));
    }

    #[test]
    fn non_patch_request_has_no_version_annotation() {
        let properties = IndexMap::new();
        let message = encode_twin_request("GET", "/", &properties, "{}").unwrap();
        assert!(!message.message_annotations.contains_key("version"));
    }

    #[test]
    fn root_resource_has_no_resource_annotation() {
        let properties = IndexMap::new();
        let message = encode_twin_request("GET", "/", &properties, "{}").unwrap();
        assert!(!message.message_annotations.contains_key("resource"));
    }

    #[test]
    fn non_rid_properties_land_in_application_properties() {
        let mut properties = IndexMap::new();
        properties.insert("custom".to_string(), AmqpValue::from("value"));
        let message = encode_twin_request("GET", "/properties", &properties, "{}").unwrap();
        assert_eq!(
            message.application_properties.get("custom"),
            Some(&AmqpValue::from("value"))
        );
        assert!(message.properties.correlation_id.is_none());
    }

    #[test]
    fn empty_method_is_a_reference_error() {
        let properties = IndexMap::new();
        let result = encode_twin_request("", "/properties", &properties, "{}");
        assert!(matches!(result, Err(TwinError::Reference(_))));
    }
}
