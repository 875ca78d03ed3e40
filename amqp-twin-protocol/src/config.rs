//! Twin node addressing and attach-property constants.

/// `com.microsoft:channel-correlation-id` attach property name.
pub const CHANNEL_CORRELATION_PROPERTY: &str = "com.microsoft:channel-correlation-id";

/// `com.microsoft:api-version` attach property name.
pub const API_VERSION_PROPERTY: &str = "com.microsoft:api-version";

/// Resource a `post` subscription is PUT/DELETEd against.
pub const DESIRED_PROPERTIES_RESOURCE: &str = "/notifications/twin/properties/desired";

/// Synthetic envelope topic for `response` events.
pub const RESPONSE_TOPIC: &str = "$iothub/twin/res";

/// Default API version sent as the `com.microsoft:api-version` attach property when the
/// caller does not override it.
pub const DEFAULT_API_VERSION: &str = "2021-04-12";

/// Configuration for a [`crate::TwinClientHandle`].
///
/// Builder-style, the way `fe2o3-amqp-management::client::MgmtClientBuilder` is: callers
/// supply the device id up front and may override the api-version; everything else
/// (channel-correlation-id, settle modes) is derived internally.
#[derive(Debug, Clone)]
pub struct TwinClientConfig {
    pub(crate) device_id: String,
    pub(crate) api_version: String,
}

impl TwinClientConfig {
    /// Creates a configuration for the given device id, with the default api-version.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Overrides the api-version attach property, builder-style.
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// The twin node address for this device: `/devices/<deviceId>/twin/`.
    pub fn node_address(&self) -> String {
        format!("/devices/{}/twin/", self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_address_carries_trailing_slash() {
        let config = TwinClientConfig::new("dev1");
        assert_eq!(config.node_address(), "/devices/dev1/twin/");
    }
}
