//! Replication protocol handlers.
//!
//! Record notifications are relayed to every other connection and then
//! queued for the authoritative store. `SCHEMA` returns the served schemas
//! and `NOTIFY` pushes the rows of a query back to the caller.

use rtdb_engine::rpc::{BoxError, Request};
use rtdb_engine::{EventKind, Handlers, Inbound, Listeners, Method, Query, RecordChange, ReplicationEvent};
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::CallContext;

/// Bind the replication methods on the shared registries.
pub fn register_replication(handlers: &Handlers<CallContext>, listeners: &Listeners<Method, Inbound<CallContext>>) {
    handlers.set(Method::Schema, |ctx: CallContext, _params: Vec<Value>| async move {
        Ok(serde_json::to_value(ctx.server.schemas())?)
    });

    handlers.set(Method::Notify, |ctx: CallContext, params: Vec<Value>| async move {
        Ok(handle_notify(&ctx, params).await?)
    });

    for kind in EventKind::ALL {
        listeners.add(kind.method(), move |inbound: &Inbound<CallContext>| {
            handle_record_change(kind, inbound)
        });
    }
}

/// Relay a client's change to the other clients, then queue the write.
fn handle_record_change(kind: EventKind, inbound: &Inbound<CallContext>) -> std::result::Result<(), BoxError> {
    let method = kind.method();
    let event = ReplicationEvent::from_params(method, &inbound.params)?;
    let frame = Request::notification(method, inbound.params.clone()).to_json()?;

    let ctx = &inbound.ctx;
    let relayed = ctx.server.connections().broadcast_except(&ctx.conn_id, &frame);
    tracing::debug!(
        conn_id = %ctx.conn_id,
        method = %method,
        db = %event.change.db,
        collection = %event.change.collection,
        relayed,
        "Record change relayed"
    );

    ctx.server.enqueue_write(event);
    Ok(())
}

/// Push every row matching the query to the caller as a put notification.
///
/// Returns the number of rows pushed.
pub async fn handle_notify(ctx: &CallContext, params: Vec<Value>) -> Result<Value> {
    let query = Query::from_params(&params)?;
    let db = ctx
        .server
        .database(&query.db)
        .ok_or_else(|| AppError::NotFound(format!("database {}", query.db)))?;

    let rows = db.find(&query).await?;
    let mut pushed = 0usize;
    for row in rows {
        let mut change = RecordChange::new(query.db.clone(), query.collection.clone());
        change.key = db.key_of(&query.collection, &row);
        change.record = Some(row);
        let params = ReplicationEvent::remote(EventKind::Put, change).to_params()?;
        let frame = Request::notification(Method::RecordPut, params).to_json()?;
        if ctx.server.connections().send_to(&ctx.conn_id, frame) {
            pushed += 1;
        }
    }

    tracing::debug!(
        conn_id = %ctx.conn_id,
        db = %query.db,
        collection = %query.collection,
        pushed,
        "Query rows pushed"
    );
    Ok(json!(pushed))
}
