//! Rule evaluation and dispatch of inbound messages.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bridge::bus::BusReceiver;
use crate::bridge::clients::ClientRegistry;
use crate::bridge::rules::RuleSet;
use crate::bridge::template::TemplateContext;
use crate::common::{InboundMessage, OutboundSend};

/// Single consumer of the message bus.
pub struct Router {
    rules: RuleSet,
    registry: Arc<ClientRegistry>,
}

impl Router {
    pub fn new(rules: RuleSet, registry: Arc<ClientRegistry>) -> Self {
        Self { rules, registry }
    }

    /// Every send `msg` produces, in rule order.
    ///
    /// Each matching rule renders the message with the template of its
    /// destination client. Rules whose destination has no transport are skipped.
    pub fn route(&self, msg: &InboundMessage) -> Vec<OutboundSend> {
        let ctx = TemplateContext::new(&msg.origin_client_id, &msg.author, &msg.text);

        self.rules
            .iter()
            .filter(|rule| rule.matches(msg))
            .filter_map(|rule| {
                let Some(target) = self.registry.get(&rule.to.client_id) else {
                    warn!("No transport for client '{}', skipping {}", rule.to.client_id, rule.to);
                    return None;
                };
                Some(OutboundSend {
                    target_client_id: rule.to.client_id.clone(),
                    target_channel: rule.to.channel.clone(),
                    rendered_text: target.template().render(&ctx),
                })
            })
            .collect()
    }

    /// Route `msg` and hand each send to its transport.
    pub fn handle(&self, msg: &InboundMessage) {
        info!(
            "[{}] {} @ {}: {}",
            msg.origin_client_id, msg.author, msg.origin_channel, msg.text
        );

        for send in self.route(msg) {
            debug!(
                "Forwarding message `{}` to {}@{}",
                send.rendered_text, send.target_channel, send.target_client_id
            );
            if let Some(transport) = self.registry.get(&send.target_client_id) {
                transport.send(&send.target_channel, send.rendered_text);
            }
        }
    }

    /// Consume the bus until every publisher is gone.
    pub async fn run(self, mut bus: BusReceiver) {
        info!("Router started with {} rule(s)", self.rules.len());
        while let Some(msg) = bus.recv().await {
            self.handle(&msg);
        }
        debug!("Message bus closed, router stopped");
    }
}
