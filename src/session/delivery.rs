//! A message handed to a consumer and awaiting acknowledgement

use crate::collaborators::DeliverySender;
use crate::error::Result;
use crate::message::MessageReference;
use std::sync::Arc;

/// One entry in a session's delivery ledger
#[derive(Debug, Clone)]
pub struct Delivery {
    reference: Arc<MessageReference>,
    consumer_id: String,
    delivery_id: u64,
}

impl Delivery {
    pub fn new(reference: Arc<MessageReference>, consumer_id: impl Into<String>, delivery_id: u64) -> Self {
        Self {
            reference,
            consumer_id: consumer_id.into(),
            delivery_id,
        }
    }

    pub fn reference(&self) -> &Arc<MessageReference> {
        &self.reference
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn delivery_id(&self) -> u64 {
        self.delivery_id
    }

    /// Push this delivery to the client
    pub fn deliver(&self, sender: &dyn DeliverySender) -> Result<()> {
        sender.send_delivery(self)
    }
}
