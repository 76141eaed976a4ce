//! Command handlers
//!
//! Each handler projects live gateway state into a [`Response`]. Failures
//! are reported in-band with `result=error` so one bad request never
//! affects the connection.

use crate::protocol::{Request, Response};
use relaygate_config::MONITOR_PLUGIN_NAME;
use relaygate_core::{Error, Message, Result, WorkQueue};
use relaygate_runtime::Gateway;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dispatches control requests against a running gateway
#[derive(Debug, Clone)]
pub struct CommandHandler {
    gateway: Arc<Gateway>,
    queue: Arc<WorkQueue>,
}

impl CommandHandler {
    /// Create a handler; `queue` is the monitor's own subscription queue
    pub fn new(gateway: Arc<Gateway>, queue: Arc<WorkQueue>) -> Self {
        Self { gateway, queue }
    }

    /// Answer one request
    pub fn handle(&self, request: &Request) -> Response {
        debug!(command = %request.command, "Complete command");
        match self.dispatch(request) {
            Ok(response) => response,
            Err(e) => {
                warn!(command = %request.command, error = %e, "Request failed");
                Response::new(&request.command).error(e)
            }
        }
    }

    fn dispatch(&self, request: &Request) -> Result<Response> {
        match request.command.as_str() {
            "graph" => Ok(self.graph()),
            "stats" => Ok(self.stats()),
            "config" => self.config(request),
            "pubsub" => match request.require("action")? {
                "list" => Ok(self.subscription_table()),
                "publications" => self.publications(request),
                other => Err(Error::Protocol(format!("Unknown pubsub action '{other}'"))),
            },
            "pubsub_subscribe" => self.subscribe(request),
            "pubsub_unsubscribe" => self.unsubscribe(request),
            "pubsub_publications" => self.publications(request),
            "pubsub_publication_list" => self.publication_list(request),
            "pubsub_subscription_list" => Ok(self.subscription_list(request)),
            other => Err(Error::Protocol(format!("Unhandled command '{other}'"))),
        }
    }

    fn graph(&self) -> Response {
        let mut response = Response::new("graph");
        for (plugin, outputs) in self.gateway.graph() {
            for output in outputs {
                response.push_line(format!("{plugin}|{output}"));
            }
        }
        response
    }

    fn stats(&self) -> Response {
        let stats = self.gateway.stats();
        let p = stats.packets;

        let mut data = String::new();
        let _ = writeln!(
            data,
            "CORE|{} {} {} {} {} {} {}",
            stats.uptime_secs,
            p.bytes_in,
            p.bytes_out,
            p.bytes_dropped,
            p.packets_in,
            p.packets_out,
            p.packets_dropped
        );
        for row in stats.plugins {
            let s = row.stats;
            let _ = writeln!(
                data,
                "{}|{} {} {} {} {}",
                row.name,
                s.packets_in,
                s.packets_out,
                s.packets_dropped,
                s.packets_held(),
                row.queue_len
            );
        }

        Response::new("stats").data(data)
    }

    fn config(&self, request: &Request) -> Result<Response> {
        let action = request.require("action")?;
        let plugin = request.require("plugin")?;

        let reply_action = match action {
            "get" => "get-response",
            "set" => "set-response",
            other => return Err(Error::Protocol(format!("Unknown config action '{other}'"))),
        };
        let response = Response::new("config")
            .option("action", reply_action)
            .option("plugin", plugin);

        let outcome = self.gateway.plugin_config_path(plugin).and_then(|path| {
            if action == "get" {
                Ok(Some(std::fs::read_to_string(&path)?))
            } else {
                std::fs::write(&path, &request.data)?;
                info!(plugin = %plugin, path = %path.display(), "Plugin settings rewritten");
                Ok(None)
            }
        });

        Ok(match outcome {
            Ok(Some(content)) => response.ok().data(content),
            Ok(None) => response.ok(),
            Err(e) => {
                warn!(plugin = %plugin, action = %action, error = %e, "Config request failed");
                response.error(e)
            }
        })
    }

    fn subscription_table(&self) -> Response {
        let mut response = Response::new("pubsub");
        for (fq_name, subscribers) in self.gateway.services().bus().subscriptions() {
            let mut line = fq_name;
            for subscriber in subscribers {
                line.push('|');
                line.push_str(&subscriber);
            }
            response.push_line(line);
        }
        response
    }

    fn publications(&self, request: &Request) -> Result<Response> {
        let plugin = request.require("plugin")?;
        if self.gateway.registry().get(plugin).is_none() {
            return Err(Error::PluginNotFound(plugin.to_string()));
        }

        let mut response = Response::new("pubsub_publications").option("plugin", plugin);
        for publication in self.gateway.services().bus().list_publications(plugin) {
            response.push_line(format!(
                "{}|{}|{}",
                publication.fq_name, publication.description, publication.last_update
            ));
        }
        Ok(response)
    }

    fn publication_list(&self, request: &Request) -> Result<Response> {
        let bus = self.gateway.services().bus();
        let mut response = Response::new("pubsub_publication_list");

        let plugins = match request.option("plugin") {
            Some(plugin) => {
                if self.gateway.registry().get(plugin).is_none() {
                    return Err(Error::PluginNotFound(plugin.to_string()));
                }
                response = response.option("plugin", plugin);
                vec![plugin.to_string()]
            }
            None => self
                .gateway
                .registry()
                .handles()
                .iter()
                .map(|h| h.name().to_string())
                .collect(),
        };

        for plugin in plugins {
            for publication in bus.list_publications(&plugin) {
                response.push_line(format!("{plugin}|{}", publication.fq_name));
            }
        }
        Ok(response)
    }

    fn subscribe(&self, request: &Request) -> Result<Response> {
        let fq_name = request.require("fq_name")?;
        let added = self.gateway.services().bus().subscribe(
            MONITOR_PLUGIN_NAME,
            Arc::clone(&self.queue),
            fq_name,
        );
        if added {
            info!(fq_name = %fq_name, "Control client subscribed");
        }
        Ok(Response::new("pubsub_subscribe")
            .option("fq_name", fq_name)
            .ok())
    }

    fn unsubscribe(&self, request: &Request) -> Result<Response> {
        let fq_name = request.require("fq_name")?;
        let response = Response::new("pubsub_unsubscribe").option("fq_name", fq_name);
        if self
            .gateway
            .services()
            .bus()
            .unsubscribe(MONITOR_PLUGIN_NAME, fq_name)
        {
            info!(fq_name = %fq_name, "Control client unsubscribed");
            Ok(response.ok())
        } else {
            Ok(response.error("not subscribed"))
        }
    }

    fn subscription_list(&self, request: &Request) -> Response {
        let plugin = request.option("plugin").unwrap_or(MONITOR_PLUGIN_NAME);
        let mut response = Response::new("pubsub_subscription_list").option("plugin", plugin);
        for fq_name in self.gateway.services().bus().subscriptions_of(plugin) {
            response.push_line(fq_name);
        }
        response
    }
}

/// Push announcing a value delivered to the monitor's subscriptions
pub fn pubsub_update(message: &Message) -> Response {
    Response::new("pubsub_update")
        .option("fq_name", &message.fq_name)
        .option("type", message.value.type_name())
        .option("plugin", &message.origin.plugin)
        .option("module", &message.origin.module)
        .line(message.value.render())
}

/// Push carrying one formatted log line
pub fn log_push(line: &str) -> Response {
    let mut response = Response::new("log");
    response.push_line(line.trim_end_matches('\n'));
    response
}
