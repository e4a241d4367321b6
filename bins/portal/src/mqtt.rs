//! Broker client backed by rumqttc.

use std::collections::VecDeque;
use std::time::Duration;

use portal_core::cfg::BrokerConfig;
use portal_core::fault::BusFault;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tracing::{debug, warn};

use crate::hal::{BusClient, BusEvent};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MqttBus {
    opts: MqttOptions,
    client: AsyncClient,
    eventloop: EventLoop,
    pending: VecDeque<BusEvent>,
}

impl MqttBus {
    pub fn new(cfg: &BrokerConfig) -> Self {
        let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        opts.set_keep_alive(Duration::from_secs(30));
        if let Some((user, pass)) = cfg.credentials() {
            opts.set_credentials(user, pass);
        }
        let (client, eventloop) = AsyncClient::new(opts.clone(), 20);
        Self { opts, client, eventloop, pending: VecDeque::new() }
    }

    fn translate(event: Event) -> Option<BusEvent> {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => Some(BusEvent::Connected),
            Event::Incoming(Packet::Disconnect) => Some(BusEvent::Disconnected),
            Event::Incoming(Packet::Publish(p)) => Some(BusEvent::Message {
                topic: p.topic,
                payload: String::from_utf8_lossy(&p.payload).into_owned(),
            }),
            Event::Incoming(Packet::SubAck(ack)) => Some(BusEvent::Subscribed(format!("pkid {}", ack.pkid))),
            Event::Outgoing(Outgoing::Publish(pkid)) => Some(BusEvent::Published(format!("pkid {pkid}"))),
            other => {
                debug!(?other, "mqtt event");
                None
            }
        }
    }
}

impl BusClient for MqttBus {
    fn broker(&self) -> String {
        let (host, port) = self.opts.broker_address();
        format!("{host}:{port}")
    }

    async fn connect(&mut self) -> Result<(), BusFault> {
        // a fresh session each time; the old event loop may hold a dead socket
        let (client, eventloop) = AsyncClient::new(self.opts.clone(), 20);
        self.client = client;
        self.eventloop = eventloop;
        self.pending.clear();

        let wait_for_ack = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(BusFault::Connect(e.to_string())),
                }
            }
        };
        match tokio::time::timeout(CONNECT_TIMEOUT, wait_for_ack).await {
            Ok(Ok(())) => {
                self.pending.push_back(BusEvent::Connected);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BusFault::Connect(format!("no CONNACK within {}s", CONNECT_TIMEOUT.as_secs()))),
        }
    }

    async fn disconnect(&mut self) -> Result<(), BusFault> {
        self.client
            .disconnect()
            .await
            .map_err(|e| BusFault::Disconnect(e.to_string()))?;
        self.pending.push_back(BusEvent::Disconnected);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<(), BusFault> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| BusFault::Request(format!("publish {topic}: {e}")))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BusFault> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| BusFault::Request(format!("subscribe {topic}: {e}")))
    }

    async fn service(&mut self, timeout: Duration) -> Result<Vec<BusEvent>, BusFault> {
        let mut events: Vec<BusEvent> = self.pending.drain(..).collect();
        if !events.is_empty() {
            return Ok(events);
        }
        match tokio::time::timeout(timeout, self.eventloop.poll()).await {
            Err(_elapsed) => Ok(events),
            Ok(Ok(event)) => {
                events.extend(Self::translate(event));
                Ok(events)
            }
            Ok(Err(e)) => {
                warn!("mqtt connection error: {e}");
                Err(BusFault::Service(e.to_string()))
            }
        }
    }
}
