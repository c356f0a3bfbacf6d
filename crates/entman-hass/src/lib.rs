// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod wire;

use entman_app::{
    BulkOutcome, DeviceInfo, EntityId, Gateway, GatewayError, IntegrationGroup, RegistryEntry,
    RemovalOutcome, StateFilter,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};
use url::Url;

use crate::wire::{Auth, Incoming, WireBulkResult, WireIntegration};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const WEBSOCKET_PATH: &str = "/api/websocket";

const GET_ENTITIES: &str = "entity_manager/get_disabled_entities";
const LIST_DEVICES: &str = "config/device_registry/list";
const ENABLE_ENTITY: &str = "entity_manager/enable_entity";
const DISABLE_ENTITY: &str = "entity_manager/disable_entity";
const BULK_ENABLE: &str = "entity_manager/bulk_enable";
const BULK_DISABLE: &str = "entity_manager/bulk_disable";
const RENAME_ENTITY: &str = "entity_manager/rename_entity";
const UPDATE_DISPLAY_NAME: &str = "entity_manager/update_entity_display_name";
const REMOVE_ENTITY: &str = "entity_manager/remove_entity";
const EXPORT_STATES: &str = "entity_manager/export_states";

/// Turns a Home Assistant base URL into its WebSocket endpoint.
///
/// `http` maps to `ws` and `https` to `wss`; a URL that already names the
/// endpoint is kept as is.
pub fn websocket_url(base_url: &str) -> Result<Url, GatewayError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Transport(
            "hass.url must not be empty".to_owned(),
        ));
    }
    let mut url = Url::parse(trimmed)
        .map_err(|error| GatewayError::Transport(format!("invalid url {trimmed:?}: {error}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(GatewayError::Transport(format!(
                "unsupported url scheme {other:?} -- use http:// or https://"
            )));
        }
    };
    url.set_scheme(scheme).map_err(|()| {
        GatewayError::Transport(format!("cannot use scheme {scheme} for {trimmed:?}"))
    })?;

    let path = url.path().trim_end_matches('/').to_owned();
    if !path.ends_with(WEBSOCKET_PATH) {
        url.set_path(&format!("{path}{WEBSOCKET_PATH}"));
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Authenticated connection to the Home Assistant WebSocket API.
///
/// Every call is one request/response round trip on the shared socket.
pub struct Client {
    url: Url,
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    timeout: Duration,
    next_id: u64,
    ha_version: Option<String>,
}

impl Client {
    pub fn connect(base_url: &str, token: &str, timeout: Duration) -> Result<Self, GatewayError> {
        if token.trim().is_empty() {
            return Err(GatewayError::Auth(
                "access token is empty -- set hass.token_env or hass.token".to_owned(),
            ));
        }
        let url = websocket_url(base_url)?;
        let stream = open_stream(&url, timeout)?;

        let (socket, _response) =
            tungstenite::client_tls_with_config(url.as_str(), stream, None, None).map_err(
                |error| match error {
                    tungstenite::HandshakeError::Interrupted(_) => GatewayError::Timeout(timeout),
                    tungstenite::HandshakeError::Failure(error) => socket_error(error, timeout),
                },
            )?;

        let mut client = Self {
            url,
            socket,
            timeout,
            next_id: 1,
            ha_version: None,
        };
        client.authenticate(token)?;
        info!(url = %client.url, version = ?client.ha_version, "connected to Home Assistant");
        Ok(client)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn ha_version(&self) -> Option<&str> {
        self.ha_version.as_deref()
    }

    pub fn close(mut self) {
        if let Err(error) = self.socket.close(None) {
            debug!(%error, "closing websocket");
        }
    }

    fn authenticate(&mut self, token: &str) -> Result<(), GatewayError> {
        let deadline = Instant::now() + self.timeout;
        match self.read_incoming(deadline)? {
            Incoming::AuthRequired { ha_version } => self.ha_version = ha_version,
            other => {
                return Err(GatewayError::Decode(format!(
                    "expected auth_required, got {other:?}"
                )));
            }
        }

        let auth = Auth {
            kind: "auth",
            access_token: token,
        };
        let payload = serde_json::to_string(&auth)
            .map_err(|error| GatewayError::Decode(format!("encode auth: {error}")))?;
        self.write(payload)?;

        match self.read_incoming(deadline)? {
            Incoming::AuthOk { ha_version } => {
                if ha_version.is_some() {
                    self.ha_version = ha_version;
                }
                Ok(())
            }
            Incoming::AuthInvalid { message } => Err(GatewayError::Auth(
                message.unwrap_or_else(|| "invalid access token".to_owned()),
            )),
            other => Err(GatewayError::Decode(format!(
                "expected auth_ok, got {other:?}"
            ))),
        }
    }

    fn command(&mut self, kind: &str, fields: Value) -> Result<Value, GatewayError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut payload = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        payload.insert("id".to_owned(), Value::from(id));
        payload.insert("type".to_owned(), Value::from(kind));

        let started = Instant::now();
        debug!(id, kind, "sending command");
        self.write(Value::Object(payload).to_string())?;

        let deadline = started + self.timeout;
        loop {
            match self.read_incoming(deadline)? {
                Incoming::Result {
                    id: reply,
                    success,
                    result,
                    error,
                } if reply == id => {
                    debug!(
                        id,
                        kind,
                        success,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "command finished"
                    );
                    if success {
                        return Ok(result.unwrap_or(Value::Null));
                    }
                    let error = error.unwrap_or_default();
                    return Err(GatewayError::Rejected {
                        code: error.code,
                        message: error.message,
                    });
                }
                other => debug!(id, message = ?other, "skipping unrelated message"),
            }
        }
    }

    fn write(&mut self, payload: String) -> Result<(), GatewayError> {
        self.socket
            .send(Message::text(payload))
            .map_err(|error| socket_error(error, self.timeout))
    }

    fn read_incoming(&mut self, deadline: Instant) -> Result<Incoming, GatewayError> {
        loop {
            if Instant::now() >= deadline {
                return Err(GatewayError::Timeout(self.timeout));
            }
            let message = self
                .socket
                .read()
                .map_err(|error| socket_error(error, self.timeout))?;
            match message {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).map_err(|error| {
                        GatewayError::Decode(format!("invalid message: {error}"))
                    });
                }
                Message::Close(frame) => {
                    let reason = frame
                        .map(|frame| frame.reason.as_str().to_owned())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "no reason given".to_owned());
                    return Err(GatewayError::Transport(format!(
                        "connection closed by Home Assistant ({reason})"
                    )));
                }
                _ => {}
            }
        }
    }
}

fn open_stream(url: &Url, timeout: Duration) -> Result<TcpStream, GatewayError> {
    let host = url
        .host_str()
        .ok_or_else(|| GatewayError::Transport(format!("url {url} has no host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| GatewayError::Transport(format!("url {url} has no port")))?;
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|error| GatewayError::Transport(format!("resolve {host}: {error}")))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                let configured = stream
                    .set_read_timeout(Some(timeout))
                    .and_then(|()| stream.set_write_timeout(Some(timeout)))
                    .and_then(|()| stream.set_nodelay(true));
                if let Err(error) = configured {
                    return Err(GatewayError::Transport(format!(
                        "configure socket: {error}"
                    )));
                }
                return Ok(stream);
            }
            Err(error) => {
                debug!(%addr, %error, "connect attempt failed");
                last_error = Some(error);
            }
        }
    }

    Err(match last_error {
        Some(error) if error.kind() == ErrorKind::TimedOut => GatewayError::Timeout(timeout),
        Some(error) => GatewayError::Transport(format!("{host}:{port}: {error}")),
        None => GatewayError::Transport(format!("{host} resolved to no addresses")),
    })
}

fn socket_error(error: tungstenite::Error, timeout: Duration) -> GatewayError {
    match error {
        tungstenite::Error::Io(io)
            if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
        {
            GatewayError::Timeout(timeout)
        }
        other => GatewayError::Transport(other.to_string()),
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, GatewayError> {
    serde_json::from_value(value).map_err(|error| GatewayError::Decode(format!("{what}: {error}")))
}

impl Gateway for Client {
    fn fetch_entities(
        &mut self,
        state: StateFilter,
    ) -> Result<Vec<IntegrationGroup>, GatewayError> {
        let result = self.command(GET_ENTITIES, json!({ "state": state.as_str() }))?;
        let groups: Vec<WireIntegration> = decode(result, "entity list")?;
        Ok(groups.into_iter().map(IntegrationGroup::from).collect())
    }

    fn fetch_device_registry(&mut self) -> Result<Vec<DeviceInfo>, GatewayError> {
        let result = self.command(LIST_DEVICES, json!({}))?;
        decode(result, "device registry")
    }

    fn enable(&mut self, entity_id: &EntityId) -> Result<(), GatewayError> {
        self.command(ENABLE_ENTITY, json!({ "entity_id": entity_id }))?;
        Ok(())
    }

    fn disable(&mut self, entity_id: &EntityId) -> Result<(), GatewayError> {
        self.command(DISABLE_ENTITY, json!({ "entity_id": entity_id }))?;
        Ok(())
    }

    fn bulk_enable(&mut self, entity_ids: &[EntityId]) -> Result<BulkOutcome, GatewayError> {
        let result = self.command(BULK_ENABLE, json!({ "entity_ids": entity_ids }))?;
        let outcome = BulkOutcome::from(decode::<WireBulkResult>(result, "bulk result")?);
        if outcome.is_partial() {
            warn!(failed = outcome.failed.len(), "bulk enable partially failed");
        }
        Ok(outcome)
    }

    fn bulk_disable(&mut self, entity_ids: &[EntityId]) -> Result<BulkOutcome, GatewayError> {
        let result = self.command(BULK_DISABLE, json!({ "entity_ids": entity_ids }))?;
        let outcome = BulkOutcome::from(decode::<WireBulkResult>(result, "bulk result")?);
        if outcome.is_partial() {
            warn!(failed = outcome.failed.len(), "bulk disable partially failed");
        }
        Ok(outcome)
    }

    fn rename(&mut self, old: &EntityId, new: &EntityId) -> Result<(), GatewayError> {
        self.command(
            RENAME_ENTITY,
            json!({ "old_entity_id": old, "new_entity_id": new }),
        )?;
        Ok(())
    }

    fn set_display_name(
        &mut self,
        entity_id: &EntityId,
        name: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.command(
            UPDATE_DISPLAY_NAME,
            json!({ "entity_id": entity_id, "name": name }),
        )?;
        Ok(())
    }

    fn remove_entity(&mut self, entity_id: &EntityId) -> Result<RemovalOutcome, GatewayError> {
        let result = self.command(REMOVE_ENTITY, json!({ "entity_id": entity_id }))?;
        let outcome: RemovalOutcome = decode(result, "remove result")?;
        if let Some(warning) = &outcome.warning {
            warn!(%entity_id, warning, "entity removed with warning");
        }
        Ok(outcome)
    }

    fn export_states(&mut self) -> Result<Vec<RegistryEntry>, GatewayError> {
        let result = self.command(EXPORT_STATES, json!({}))?;
        let entries: Vec<RegistryEntry> = decode(result, "state export")?;
        debug!(entries = entries.len(), "exported registry states");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::websocket_url;

    #[test]
    fn websocket_url_maps_http_schemes() {
        assert_eq!(
            websocket_url("http://homeassistant.local:8123")
                .expect("url")
                .as_str(),
            "ws://homeassistant.local:8123/api/websocket"
        );
        assert_eq!(
            websocket_url("https://ha.example.com/").expect("url").as_str(),
            "wss://ha.example.com/api/websocket"
        );
    }

    #[test]
    fn websocket_url_keeps_subpaths_and_existing_endpoint() {
        assert_eq!(
            websocket_url("https://example.com/hass/?x=1")
                .expect("url")
                .as_str(),
            "wss://example.com/hass/api/websocket"
        );
        assert_eq!(
            websocket_url("ws://10.0.0.2:8123/api/websocket")
                .expect("url")
                .as_str(),
            "ws://10.0.0.2:8123/api/websocket"
        );
    }

    #[test]
    fn websocket_url_rejects_bad_input() {
        assert!(websocket_url("").is_err());
        assert!(websocket_url("ftp://example.com").is_err());
        assert!(websocket_url("not a url").is_err());
    }
}
