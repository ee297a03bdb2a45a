//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! Runs the follower as a task on its own tokio runtime and talks to it with
//! serialized envelopes over channels. Every request carries its own reply
//! channel so replies can never be matched to the wrong request.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::Id3Config;
use crate::id3::messages::*;
use crate::id3::traits::ComparisonParticipant;
use crate::id3::traits::Statistics;
use crate::id3::Attribute;
use crate::id3::NodeValuePair;
use crate::id3::ProtocolError;
use crate::id3::RoundId;

/// Requests buffered on the channel before senders wait
const CHANNEL_CAPACITY: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Party {
    Master,
    Follower,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    CheckSchema {
        attributes: Vec<Attribute>,
        path: Vec<NodeValuePair>,
    },
    ClassCounts {
        path: Vec<NodeValuePair>,
    },
    AttributeCounts {
        path: Vec<NodeValuePair>,
        attribute: Attribute,
    },
    Blind(BlindRequest),
    UnblindProducts(ProductRequest),
    Compare(CompareRequest),
    ZeroTest(ZeroTestRequest),
    Abort {
        round: RoundId,
    },

    SchemaAccepted,
    ClassCountsReply(EncryptedClassCounts),
    AttributeCountsReply(EncryptedAttributeCounts),
    BlindReply(BlindResponse),
    ProductsReply(ProductResponse),
    CompareReply(CompareResponse),
    ZeroTestReply(ZeroTestResponse),
    Aborted,
    Error(ProtocolError),
}

impl Message {
    fn kind(&self) -> &'static str {
        match self {
            Message::CheckSchema { .. } => "check_schema",
            Message::ClassCounts { .. } => "class_counts",
            Message::AttributeCounts { .. } => "attribute_counts",
            Message::Blind(_) => "blind",
            Message::UnblindProducts(_) => "unblind_products",
            Message::Compare(_) => "compare",
            Message::ZeroTest(_) => "zero_test",
            Message::Abort { .. } => "abort",
            Message::SchemaAccepted => "schema_accepted",
            Message::ClassCountsReply(_) => "class_counts_reply",
            Message::AttributeCountsReply(_) => "attribute_counts_reply",
            Message::BlindReply(_) => "blind_reply",
            Message::ProductsReply(_) => "products_reply",
            Message::CompareReply(_) => "compare_reply",
            Message::ZeroTestReply(_) => "zero_test_reply",
            Message::Aborted => "aborted",
            Message::Error(_) => "error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: Party,
    pub id: u64,
    pub body: Message,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self)
            .map_err(|e| ProtocolError::ProtocolAbort(format!("cannot encode envelope: {}", e)))
    }

    pub fn decode(frame: &[u8]) -> Result<Envelope, ProtocolError> {
        serde_json::from_slice(frame)
            .map_err(|e| ProtocolError::ProtocolAbort(format!("cannot decode envelope: {}", e)))
    }
}

struct Exchange {
    frame: Vec<u8>,
    reply: oneshot::Sender<Vec<u8>>,
}

fn unexpected(expected: &str, got: Message) -> ProtocolError {
    match got {
        Message::Error(e) => e,
        other => ProtocolError::ProtocolAbort(format!(
            "expected {}, got {}",
            expected,
            other.kind()
        )),
    }
}

fn dispatch<T>(receiver: &T, body: Message) -> Message
where
    T: Statistics + ComparisonParticipant,
{
    let reply = match body {
        Message::CheckSchema { attributes, path } => receiver
            .check_schema(&attributes, &path)
            .map(|_| Message::SchemaAccepted),
        Message::ClassCounts { path } => receiver.class_counts(&path).map(Message::ClassCountsReply),
        Message::AttributeCounts { path, attribute } => receiver
            .attribute_counts(&path, &attribute)
            .map(Message::AttributeCountsReply),
        Message::Blind(r) => receiver.blind(r).map(Message::BlindReply),
        Message::UnblindProducts(r) => receiver.unblind_products(r).map(Message::ProductsReply),
        Message::Compare(r) => receiver.compare(r).map(Message::CompareReply),
        Message::ZeroTest(r) => receiver.zero_test(r).map(Message::ZeroTestReply),
        Message::Abort { round } => {
            receiver.abort(round);
            Ok(Message::Aborted)
        }
        other => Err(ProtocolError::ProtocolAbort(format!(
            "{} is not a request",
            other.kind()
        ))),
    };
    reply.unwrap_or_else(Message::Error)
}

fn handle_frame<T>(receiver: &T, frame: &[u8]) -> Vec<u8>
where
    T: Statistics + ComparisonParticipant,
{
    let (id, body) = match Envelope::decode(frame) {
        Ok(env) if env.sender == Party::Master => (env.id, dispatch(receiver, env.body)),
        Ok(env) => (
            env.id,
            Message::Error(ProtocolError::ProtocolAbort(format!(
                "unexpected sender {:?}",
                env.sender
            ))),
        ),
        Err(e) => (0, Message::Error(e)),
    };
    let reply = Envelope {
        sender: Party::Follower,
        id,
        body,
    };
    reply.encode().unwrap_or_else(|e| {
        error!("Dropping reply to request {}: {}", id, e);
        Vec::new()
    })
}

/// Serves one request at a time until every sender is gone. The heavy
/// homomorphic work runs on the blocking pool.
async fn serve<T>(follower: Arc<T>, mut requests: mpsc::Receiver<Exchange>)
where
    T: Statistics + ComparisonParticipant + Send + Sync + 'static,
{
    while let Some(exchange) = requests.recv().await {
        let receiver = follower.clone();
        let frame = exchange.frame;
        let reply = match tokio::task::spawn_blocking(move || handle_frame(&*receiver, &frame)).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Follower request failed: {}", e);
                continue;
            }
        };
        if exchange.reply.send(reply).is_err() {
            debug!("Key holder stopped waiting for a reply");
        }
    }
    info!("Follower channel closed");
}

/// Key holder's end of the channel to the follower task
pub struct FollowerHandle {
    runtime: Runtime,
    requests: Option<mpsc::Sender<Exchange>>,
    next_id: AtomicU64,
    timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Moves `follower` onto a dedicated runtime. Dropping the handle closes the
/// channel, the task then drops the follower with all its open rounds.
pub fn spawn_follower<T>(follower: T, config: &Id3Config) -> Result<FollowerHandle, ProtocolError>
where
    T: Statistics + ComparisonParticipant + Send + Sync + 'static,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("id3-follower")
        .enable_all()
        .build()
        .map_err(|e| ProtocolError::ProtocolAbort(format!("cannot start follower: {}", e)))?;
    let (tx, rx) = mpsc::channel::<Exchange>(CHANNEL_CAPACITY);
    let worker = runtime.spawn(serve(Arc::new(follower), rx));

    Ok(FollowerHandle {
        runtime,
        requests: Some(tx),
        next_id: AtomicU64::new(1),
        timeout: config.round_timeout(),
        worker: Mutex::new(Some(worker)),
    })
}

impl FollowerHandle {
    fn sender(&self) -> Result<&mpsc::Sender<Exchange>, ProtocolError> {
        self.requests
            .as_ref()
            .ok_or_else(|| ProtocolError::ProtocolAbort(String::from("channel is closed")))
    }

    fn call(&self, body: Message) -> Result<Message, ProtocolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let kind = body.kind();
        let frame = Envelope {
            sender: Party::Master,
            id,
            body,
        }
        .encode()?;
        let sender = self.sender()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let reply = self.runtime.block_on(async {
            sender
                .send(Exchange {
                    frame,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| ProtocolError::ProtocolAbort(String::from("follower is gone")))?;
            match tokio::time::timeout(self.timeout, reply_rx).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => Err(ProtocolError::ProtocolAbort(format!(
                    "follower dropped {} request {}",
                    kind, id
                ))),
                Err(_) => Err(ProtocolError::ProtocolAbort(format!(
                    "no reply to {} request {} within {:?}",
                    kind, id, self.timeout
                ))),
            }
        })?;

        let env = Envelope::decode(&reply)?;
        if env.sender != Party::Follower || env.id != id {
            return Err(ProtocolError::ProtocolAbort(format!(
                "reply {} from {:?} does not answer request {}",
                env.id, env.sender, id
            )));
        }
        match env.body {
            Message::Error(e) => Err(e),
            other => Ok(other),
        }
    }

    /// Calls for `round`, telling the follower to drop it when the call fails
    fn call_round(&self, round: RoundId, body: Message) -> Result<Message, ProtocolError> {
        self.call(body).map_err(|e| {
            warn!("Round {} failed on the channel: {}", round, e);
            self.abort(round);
            e
        })
    }
}

impl Statistics for FollowerHandle {
    fn check_schema(
        &self,
        attributes: &[Attribute],
        path: &[NodeValuePair],
    ) -> Result<(), ProtocolError> {
        match self.call(Message::CheckSchema {
            attributes: attributes.to_vec(),
            path: path.to_vec(),
        })? {
            Message::SchemaAccepted => Ok(()),
            other => Err(unexpected("schema check", other)),
        }
    }

    fn class_counts(&self, path: &[NodeValuePair]) -> Result<EncryptedClassCounts, ProtocolError> {
        match self.call(Message::ClassCounts {
            path: path.to_vec(),
        })? {
            Message::ClassCountsReply(r) => Ok(r),
            other => Err(unexpected("class counts", other)),
        }
    }

    fn attribute_counts(
        &self,
        path: &[NodeValuePair],
        attribute: &Attribute,
    ) -> Result<EncryptedAttributeCounts, ProtocolError> {
        match self.call(Message::AttributeCounts {
            path: path.to_vec(),
            attribute: attribute.clone(),
        })? {
            Message::AttributeCountsReply(r) => Ok(r),
            other => Err(unexpected("attribute counts", other)),
        }
    }
}

impl ComparisonParticipant for FollowerHandle {
    fn blind(&self, request: BlindRequest) -> Result<BlindResponse, ProtocolError> {
        match self.call_round(request.round, Message::Blind(request.clone()))? {
            Message::BlindReply(r) => Ok(r),
            other => Err(unexpected("blinded factors", other)),
        }
    }

    fn unblind_products(&self, request: ProductRequest) -> Result<ProductResponse, ProtocolError> {
        match self.call_round(request.round, Message::UnblindProducts(request.clone()))? {
            Message::ProductsReply(r) => Ok(r),
            other => Err(unexpected("products", other)),
        }
    }

    fn compare(&self, request: CompareRequest) -> Result<CompareResponse, ProtocolError> {
        match self.call_round(request.round, Message::Compare(request.clone()))? {
            Message::CompareReply(r) => Ok(r),
            other => Err(unexpected("blinded difference", other)),
        }
    }

    fn zero_test(&self, request: ZeroTestRequest) -> Result<ZeroTestResponse, ProtocolError> {
        match self.call(Message::ZeroTest(request))? {
            Message::ZeroTestReply(r) => Ok(r),
            other => Err(unexpected("zero test", other)),
        }
    }

    fn abort(&self, round: RoundId) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = match (Envelope {
            sender: Party::Master,
            id,
            body: Message::Abort { round },
        })
        .encode()
        {
            Ok(frame) => frame,
            Err(_) => return,
        };
        // nobody waits for the acknowledgement
        let (reply_tx, _) = oneshot::channel();
        if let Ok(sender) = self.sender() {
            if sender
                .try_send(Exchange {
                    frame,
                    reply: reply_tx,
                })
                .is_err()
            {
                debug!("Abort for round {} not delivered", round);
            }
        }
    }
}

impl Drop for FollowerHandle {
    fn drop(&mut self) {
        self.requests.take();
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = self.runtime.block_on(worker) {
                error!("Follower task failed: {}", e);
            }
        }
    }
}
