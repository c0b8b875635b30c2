//! Gateway protocol definitions
//!
//! Defines the WebSocket protocol including op codes, frame format, and close codes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseAction, CloseCode};
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    Activity, ActivityType, HelloPayload, IdentifyPayload, IdentifyProperties,
    PresenceUpdatePayload, RequestGuildMembersPayload, ResumePayload, Status,
    VoiceStateUpdatePayload,
};

/// Gateway API version this library speaks
pub const API_VERSION: u8 = 10;

/// Append the version and encoding query to a gateway base URL
#[must_use]
pub fn gateway_query_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    format!("{base}/?v={API_VERSION}&encoding=json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_query_url() {
        assert_eq!(
            gateway_query_url("wss://gateway.discord.gg"),
            "wss://gateway.discord.gg/?v=10&encoding=json"
        );
        assert_eq!(
            gateway_query_url("wss://gateway.discord.gg/"),
            "wss://gateway.discord.gg/?v=10&encoding=json"
        );
    }
}
