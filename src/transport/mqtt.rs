//! MQTT backend over `rumqttc`'s synchronous client.

use std::time::{Duration, Instant};

use rumqttc::{
    Client, Connection, ConnectReturnCode, Event, MqttOptions, Packet, QoS, TryRecvError,
};
use tracing::{debug, info, warn};

use super::{ConnectParams, Inbox, Transport};

const KEEP_ALIVE: Duration = Duration::from_secs(15);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_CAPACITY: usize = 32;

pub struct MqttTransport {
    session: Option<(Client, Connection)>,
    connected: bool,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self {
            session: None,
            connected: false,
        }
    }

    fn wait_for_connack(connection: &mut Connection) -> bool {
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    return ack.code == ConnectReturnCode::Success;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!("mqtt connect failed: {}", e);
                    return false;
                }
                Err(_) => return false,
            }
        }
        false
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MqttTransport {
    fn connect(&mut self, params: &ConnectParams<'_>) -> bool {
        let mut options = MqttOptions::new(params.client_id, params.server, params.port);
        options
            .set_credentials(params.user, params.password)
            .set_keep_alive(KEEP_ALIVE);
        if params.secure {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        self.connected = Self::wait_for_connack(&mut connection);
        info!(server = params.server, port = params.port, ok = self.connected, "mqtt session");
        self.session = Some((client, connection));
        self.connected
    }

    fn publish(&mut self, topic: &str, payload: &str, retained: bool) -> bool {
        let Some((client, _)) = self.session.as_mut() else { return false };
        client
            .try_publish(topic, QoS::AtLeastOnce, retained, payload.as_bytes().to_vec())
            .is_ok()
    }

    fn subscribe(&mut self, topic: &str) -> bool {
        let Some((client, _)) = self.session.as_mut() else { return false };
        client.try_subscribe(topic, QoS::AtLeastOnce).is_ok()
    }

    fn poll(&mut self, inbox: &mut Inbox) {
        let Some((_, connection)) = self.session.as_mut() else { return };
        while !inbox.is_full() {
            match connection.try_recv() {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    inbox.deliver(&publish.topic, &publish.payload);
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    self.connected = false;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!("mqtt connection error: {}", e);
                    self.connected = false;
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.connected = false;
                    break;
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        if let Some((client, _)) = self.session.take() {
            let _ = client.try_disconnect();
        }
        self.connected = false;
    }
}
