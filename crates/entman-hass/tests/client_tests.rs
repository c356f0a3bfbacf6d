// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, anyhow};
use entman_app::{EntityId, Gateway, GatewayError, StateFilter};
use entman_hass::Client;
use serde_json::{Value, json};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Message, WebSocket};

const TOKEN: &str = "test-token";

type Reply = Box<dyn Fn(&Value) -> Vec<Value> + Send>;

/// Loopback Home Assistant: runs the auth handshake, then answers each
/// command with the next scripted reply. Returns every command it saw.
fn scripted_server(replies: Vec<Reply>) -> Result<(String, JoinHandle<Vec<Value>>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let url = format!("http://{}", listener.local_addr()?);

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("client connects");
        let mut socket = tungstenite::accept(stream).expect("websocket handshake");
        send(
            &mut socket,
            json!({"type": "auth_required", "ha_version": "2026.2.0"}),
        );
        let auth = receive(&mut socket);
        assert_eq!(auth["type"], "auth");
        if auth["access_token"] != TOKEN {
            send(
                &mut socket,
                json!({"type": "auth_invalid", "message": "Invalid access token or password"}),
            );
            return vec![auth];
        }
        send(
            &mut socket,
            json!({"type": "auth_ok", "ha_version": "2026.2.0"}),
        );

        let mut seen = Vec::new();
        for reply in replies {
            let command = receive(&mut socket);
            for message in reply(&command) {
                send(&mut socket, message);
            }
            seen.push(command);
        }
        seen
    });

    Ok((url, handle))
}

fn send(socket: &mut WebSocket<TcpStream>, value: Value) {
    socket
        .send(Message::text(value.to_string()))
        .expect("server send");
}

fn receive(socket: &mut WebSocket<TcpStream>) -> Value {
    loop {
        match socket.read().expect("server read") {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("json"),
            _ => continue,
        }
    }
}

fn ok(result: Value) -> Reply {
    Box::new(move |command| {
        vec![json!({"id": command["id"], "type": "result", "success": true, "result": result})]
    })
}

fn join(handle: JoinHandle<Vec<Value>>) -> Result<Vec<Value>> {
    handle
        .join()
        .map_err(|_| anyhow!("server thread panicked"))
}

#[test]
fn fetch_entities_sends_state_and_decodes_groups() -> Result<()> {
    let (url, handle) = scripted_server(vec![ok(json!([{
        "integration": "hue",
        "devices": {
            "device_1": {"device_id": "device_1", "name": "Hue Bridge", "entities": [
                {"entity_id": "light.living_room", "is_disabled": false, "original_name": "Living Room"},
                {"entity_id": "light.bedroom", "is_disabled": true, "disabled_by": "user"}
            ]}
        }
    }]))])?;

    let mut client = Client::connect(&url, TOKEN, Duration::from_secs(2))?;
    assert_eq!(client.ha_version(), Some("2026.2.0"));
    let groups = client.fetch_entities(StateFilter::All)?;
    client.close();

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].integration, "hue");
    assert_eq!(groups[0].devices[0].entities.len(), 2);
    assert!(groups[0].devices[0].entities[1].is_disabled);

    let commands = join(handle)?;
    assert_eq!(commands[0]["type"], "entity_manager/get_disabled_entities");
    assert_eq!(commands[0]["state"], "all");
    assert_eq!(commands[0]["id"], 1);
    Ok(())
}

#[test]
fn command_ids_increase_and_unrelated_messages_are_skipped() -> Result<()> {
    let (url, handle) = scripted_server(vec![
        ok(json!({"success": true})),
        Box::new(|command| {
            vec![
                json!({"id": 99, "type": "event", "event": {"event_type": "state_changed"}}),
                json!({"id": 42, "type": "result", "success": true, "result": null}),
                json!({"id": command["id"], "type": "result", "success": true,
                       "result": {"success": ["light.a"], "failed": [
                           {"entity_id": "light.b", "error": "Entity not found"}
                       ]}}),
            ]
        }),
    ])?;

    let mut client = Client::connect(&url, TOKEN, Duration::from_secs(2))?;
    client.enable(&EntityId::new("light.a"))?;
    let outcome = client.bulk_disable(&[EntityId::new("light.a"), EntityId::new("light.b")])?;
    client.close();

    assert_eq!(outcome.succeeded, vec![EntityId::new("light.a")]);
    assert_eq!(outcome.failed[0].entity_id.as_str(), "light.b");

    let commands = join(handle)?;
    assert_eq!(commands[0]["type"], "entity_manager/enable_entity");
    assert_eq!(commands[0]["entity_id"], "light.a");
    assert_eq!(commands[1]["type"], "entity_manager/bulk_disable");
    assert_eq!(commands[1]["entity_ids"], json!(["light.a", "light.b"]));
    assert_eq!(commands[1]["id"], 2);
    Ok(())
}

#[test]
fn error_results_become_rejections() -> Result<()> {
    let (url, handle) = scripted_server(vec![Box::new(|command| {
        vec![json!({
            "id": command["id"],
            "type": "result",
            "success": false,
            "error": {"code": "rename_failed", "message": "Entity already exists"}
        })]
    })])?;

    let mut client = Client::connect(&url, TOKEN, Duration::from_secs(2))?;
    let error = client
        .rename(
            &EntityId::new("light.bedroom"),
            &EntityId::new("light.living_room"),
        )
        .expect_err("rename rejected");
    client.close();

    assert_eq!(
        error,
        GatewayError::Rejected {
            code: "rename_failed".to_owned(),
            message: "Entity already exists".to_owned(),
        }
    );
    let commands = join(handle)?;
    assert_eq!(commands[0]["old_entity_id"], "light.bedroom");
    assert_eq!(commands[0]["new_entity_id"], "light.living_room");
    Ok(())
}

#[test]
fn display_name_and_device_registry_round_trip() -> Result<()> {
    let (url, handle) = scripted_server(vec![
        ok(json!({"success": true})),
        ok(json!([
            {"id": "device_1", "name": "Hue Bridge", "name_by_user": "Upstairs", "model": "BSB002"},
            {"id": "device_2", "name": null}
        ])),
    ])?;

    let mut client = Client::connect(&url, TOKEN, Duration::from_secs(2))?;
    client.set_display_name(&EntityId::new("light.bedroom"), None)?;
    let devices = client.fetch_device_registry()?;
    client.close();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].name_by_user.as_deref(), Some("Upstairs"));
    assert_eq!(devices[1].name, None);

    let commands = join(handle)?;
    assert_eq!(
        commands[0]["type"],
        "entity_manager/update_entity_display_name"
    );
    assert_eq!(commands[0]["name"], Value::Null);
    assert_eq!(commands[1]["type"], "config/device_registry/list");
    Ok(())
}

#[test]
fn remove_entity_decodes_yaml_warning() -> Result<()> {
    let (url, handle) = scripted_server(vec![
        ok(json!({
            "success": true,
            "removed_config_entry": false,
            "warning": "This entity is defined in YAML and will return after the next HA restart."
        })),
        Box::new(|command| {
            vec![json!({
                "id": command["id"],
                "type": "result",
                "success": false,
                "error": {"code": "not_found", "message": "Entity sensor.gone not found"}
            })]
        }),
    ])?;

    let mut client = Client::connect(&url, TOKEN, Duration::from_secs(2))?;
    let outcome = client.remove_entity(&EntityId::new("sensor.yaml_temp"))?;
    let error = client
        .remove_entity(&EntityId::new("sensor.gone"))
        .expect_err("unknown entity rejected");
    client.close();

    assert!(!outcome.removed_config_entry);
    assert!(
        outcome
            .warning
            .as_deref()
            .is_some_and(|warning| warning.contains("YAML"))
    );
    assert_eq!(
        error,
        GatewayError::Rejected {
            code: "not_found".to_owned(),
            message: "Entity sensor.gone not found".to_owned(),
        }
    );
    let commands = join(handle)?;
    assert_eq!(commands[0]["type"], "entity_manager/remove_entity");
    assert_eq!(commands[0]["entity_id"], "sensor.yaml_temp");
    assert_eq!(commands[1]["entity_id"], "sensor.gone");
    Ok(())
}

#[test]
fn export_states_fills_missing_platform() -> Result<()> {
    let (url, handle) = scripted_server(vec![ok(json!([
        {"entity_id": "light.bedroom", "platform": "hue", "device_id": "device_1",
         "disabled_by": "user", "is_disabled": true, "original_name": "Bedroom",
         "entity_category": null},
        {"entity_id": "sensor.loose", "device_id": null, "is_disabled": false}
    ]))])?;

    let mut client = Client::connect(&url, TOKEN, Duration::from_secs(2))?;
    let entries = client.export_states()?;
    client.close();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].platform, "hue");
    assert_eq!(entries[0].disabled_by.as_deref(), Some("user"));
    assert!(entries[0].is_disabled);
    assert_eq!(entries[1].platform, "unknown");
    assert_eq!(entries[1].device_id, None);

    let commands = join(handle)?;
    assert_eq!(commands[0]["type"], "entity_manager/export_states");
    Ok(())
}

#[test]
fn invalid_token_is_an_auth_error() -> Result<()> {
    let (url, handle) = scripted_server(Vec::new())?;

    let error = Client::connect(&url, "wrong", Duration::from_secs(2))
        .err()
        .ok_or_else(|| anyhow!("expected auth failure"))?;

    assert_eq!(
        error,
        GatewayError::Auth("Invalid access token or password".to_owned())
    );
    join(handle)?;
    Ok(())
}

#[test]
fn undecodable_result_is_a_decode_error() -> Result<()> {
    let (url, handle) = scripted_server(vec![ok(json!({"unexpected": true}))])?;

    let mut client = Client::connect(&url, TOKEN, Duration::from_secs(2))?;
    let error = client
        .fetch_entities(StateFilter::Disabled)
        .expect_err("decode failure");
    client.close();

    assert!(matches!(error, GatewayError::Decode(_)));
    join(handle)?;
    Ok(())
}

#[test]
fn silent_server_times_out() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let url = format!("http://{}", listener.local_addr()?);
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("client connects");
        let socket = tungstenite::accept(stream).expect("websocket handshake");
        thread::sleep(Duration::from_millis(600));
        drop(socket);
    });

    let error = Client::connect(&url, TOKEN, Duration::from_millis(150))
        .err()
        .ok_or_else(|| anyhow!("expected timeout"))?;

    assert_eq!(error, GatewayError::Timeout(Duration::from_millis(150)));
    handle
        .join()
        .map_err(|_| anyhow!("server thread panicked"))?;
    Ok(())
}

#[test]
fn refused_connection_is_a_transport_error() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let url = format!("http://{}", listener.local_addr()?);
    drop(listener);

    let error = Client::connect(&url, TOKEN, Duration::from_millis(200))
        .err()
        .ok_or_else(|| anyhow!("expected connection failure"))?;

    assert!(matches!(error, GatewayError::Transport(_)));
    Ok(())
}
