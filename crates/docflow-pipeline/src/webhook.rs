//! The `webhook` queue handler (spec §4.4.3, §11.4): a thin shim over the
//! delivery engine. The engine itself already swallows every internal
//! error and always resolves — this handler never has a failure path of
//! its own to report.

use docflow_core::{HandlerOutcome, Reporter};
use docflow_types::WebhookMsg;

use crate::context::Context;

pub async fn handle_webhook_message(ctx: &Context, msg: &WebhookMsg, reporter: &mut dyn Reporter) -> HandlerOutcome {
    ctx.delivery.process(&msg.delivery_id, reporter).await;
    HandlerOutcome::Advanced
}
