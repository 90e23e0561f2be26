use serde_derive::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub tls: Option<bool>,
    /// Base topic, measurements go to `<topic>/<name>`.
    pub topic: String,
    /// Retained `1`/`0` online marker, also used as the last will.
    pub presence_topic: String,
    pub keep_alive_secs: u64,
    pub retry_delay_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: None,
            username: Some("enasolar".into()),
            password: Some("password".into()),
            client_id: Some("enasolar".into()),
            tls: None,
            topic: "/enasolar".into(),
            presence_topic: "/clients/enasolar".into(),
            keep_alive_secs: 60,
            retry_delay_secs: 5,
        }
    }
}

impl MqttConfig {
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty()
            && !self.topic.is_empty()
            && !self.presence_topic.is_empty()
            && self.retry_delay_secs > 0
    }

    pub fn use_tls(&self) -> bool {
        self.tls.is_some_and(|tls| tls)
    }

    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or_else(|| if self.use_tls() { 8883 } else { 1883 })
    }

    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("enasolar")
    }

    /// Username/password pair, if any. A password without a username is
    /// ignored, an empty username disables authentication.
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self.username.as_deref().filter(|name| !name.is_empty());
        match (username, &self.password) {
            (None, None) => None,
            (None, Some(_)) => None,
            (Some(username), None) => Some((username.to_string(), "".into())),
            (Some(username), Some(password)) => Some((username.to_string(), password.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_follows_tls() {
        let mut config = MqttConfig::default();
        assert_eq!(config.port(), 1883);
        config.tls = Some(true);
        assert_eq!(config.port(), 8883);
        config.port = Some(1234);
        assert_eq!(config.port(), 1234);
    }

    #[test]
    fn password_without_username_is_dropped() {
        let config = MqttConfig {
            username: None,
            password: Some("secret".into()),
            ..MqttConfig::default()
        };
        assert!(config.credentials().is_none());

        let config = MqttConfig {
            username: Some("solar".into()),
            password: None,
            ..MqttConfig::default()
        };
        assert_eq!(config.credentials(), Some(("solar".into(), "".into())));

        let config = MqttConfig {
            username: Some("".into()),
            ..MqttConfig::default()
        };
        assert!(config.credentials().is_none());
    }

    #[test]
    fn empty_topic_is_invalid() {
        let config = MqttConfig {
            topic: "".into(),
            ..MqttConfig::default()
        };
        assert!(!config.is_valid());
        assert!(MqttConfig::default().is_valid());
    }
}
