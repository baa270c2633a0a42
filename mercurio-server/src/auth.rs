//! Pluggable authentication/authorization contracts consumed by the
//! protocol processor.
//!
//! Corresponds to spec component 4.8. The processor calls the
//! authenticator at CONNECT and the authorizator at PUBLISH/SUBSCRIBE;
//! neither is otherwise aware of wire format or transport.

use mercurio_packets::connack::ConnAckReturnCode;

/// Checks CONNECT credentials.
pub trait Authenticator: Send + Sync {
    /// `username`/`password` are as supplied on the wire. Returns the
    /// CONNACK return code to send back: `Accepted` on success.
    fn check_valid(&self, username: Option<&str>, password: Option<&[u8]>) -> ConnAckReturnCode;
}

/// Always accepts; the default when no authentication is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllAuthenticator;

impl Authenticator for AllowAllAuthenticator {
    fn check_valid(&self, _username: Option<&str>, _password: Option<&[u8]>) -> ConnAckReturnCode {
        ConnAckReturnCode::Accepted
    }
}

/// Decides whether a client may publish to / subscribe from a given topic.
pub trait Authorizator: Send + Sync {
    /// Called at PUBLISH. A denial silently drops the routing step; the
    /// client still gets its normal ack per QoS (spec error category (c)).
    fn can_write(&self, topic: &str, username: Option<&str>, client_id: &str) -> bool;

    /// Called at SUBSCRIBE, once per filter. A denial downgrades the
    /// SUBACK return code for that filter to failure (0x80).
    fn can_read(&self, filter: &str, username: Option<&str>, client_id: &str) -> bool;
}

/// Always allows; the default when no authorization policy is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllAuthorizator;

impl Authorizator for AllowAllAuthorizator {
    fn can_write(&self, _topic: &str, _username: Option<&str>, _client_id: &str) -> bool {
        true
    }

    fn can_read(&self, _filter: &str, _username: Option<&str>, _client_id: &str) -> bool {
        true
    }
}

/// Grants read/write to exactly one topic, regardless of client.
pub struct SingleTopicAuthorizator {
    pub topic: String,
}

impl Authorizator for SingleTopicAuthorizator {
    fn can_write(&self, topic: &str, _username: Option<&str>, _client_id: &str) -> bool {
        topic == self.topic
    }

    fn can_read(&self, filter: &str, _username: Option<&str>, _client_id: &str) -> bool {
        filter == self.topic
    }
}

/// Validates a username/password pair against some external store (e.g. a
/// password file). Implemented by the daemon and plugged into
/// [`ValidatingAuthenticator`].
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, username: &str, password: &[u8]) -> bool;
}

/// Authenticator backed by a [`CredentialValidator`]. Anonymous
/// connections (no username) are accepted iff `allow_anonymous`.
pub struct ValidatingAuthenticator {
    pub validator: std::sync::Arc<dyn CredentialValidator>,
    pub allow_anonymous: bool,
}

impl Authenticator for ValidatingAuthenticator {
    fn check_valid(&self, username: Option<&str>, password: Option<&[u8]>) -> ConnAckReturnCode {
        match (username, password) {
            (Some(username), Some(password)) => {
                if self.validator.validate(username, password) {
                    ConnAckReturnCode::Accepted
                } else {
                    ConnAckReturnCode::BadUsernameOrPassword
                }
            }
            (None, _) if self.allow_anonymous => ConnAckReturnCode::Accepted,
            _ => ConnAckReturnCode::BadUsernameOrPassword,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticValidator;
    impl CredentialValidator for StaticValidator {
        fn validate(&self, username: &str, password: &[u8]) -> bool {
            username == "admin" && password == b"secret"
        }
    }

    #[test]
    fn allow_all_accepts_anything() {
        let auth = AllowAllAuthenticator;
        assert_eq!(auth.check_valid(None, None), ConnAckReturnCode::Accepted);
    }

    #[test]
    fn validating_authenticator_rejects_bad_password() {
        let auth = ValidatingAuthenticator {
            validator: std::sync::Arc::new(StaticValidator),
            allow_anonymous: false,
        };
        assert_eq!(
            auth.check_valid(Some("admin"), Some(b"wrong")),
            ConnAckReturnCode::BadUsernameOrPassword
        );
        assert_eq!(
            auth.check_valid(Some("admin"), Some(b"secret")),
            ConnAckReturnCode::Accepted
        );
    }

    #[test]
    fn validating_authenticator_anonymous_policy() {
        let strict = ValidatingAuthenticator {
            validator: std::sync::Arc::new(StaticValidator),
            allow_anonymous: false,
        };
        assert_eq!(
            strict.check_valid(None, None),
            ConnAckReturnCode::BadUsernameOrPassword
        );

        let lenient = ValidatingAuthenticator {
            validator: std::sync::Arc::new(StaticValidator),
            allow_anonymous: true,
        };
        assert_eq!(lenient.check_valid(None, None), ConnAckReturnCode::Accepted);
    }

    #[test]
    fn single_topic_authorizator_scopes_to_one_topic() {
        let authz = SingleTopicAuthorizator {
            topic: "allowed".to_string(),
        };
        assert!(authz.can_write("allowed", None, "c1"));
        assert!(!authz.can_write("other", None, "c1"));
        assert!(authz.can_read("allowed", None, "c1"));
        assert!(!authz.can_read("other", None, "c1"));
    }
}
