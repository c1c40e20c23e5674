use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::command::ChargePointCommand;
use crate::message::{self, ApiMessage, MessageTopic};
use crate::notify::{ChangeNotifier, ChangeTopic, SubscriptionId};
use crate::settings::ClientSettings;
use crate::state::{Attributes, StateStore};
use crate::transport::{ApiTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ConnectionState {
    #[display("disconnected")]
    Disconnected,
    #[display("connecting")]
    Connecting,
    #[display("connected")]
    Connected,
    #[display("waiting for reconnect")]
    ReconnectWaiting,
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum ConnectorError {
    #[display("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },
    #[display("connector is shut down")]
    ShutDown,
}

#[derive(Debug)]
struct CommandRequest {
    evse_id: String,
    command: ChargePointCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitialSync {
    AwaitingChargePoints,
    AwaitingReplies(usize),
    Done,
}

enum SessionEnd {
    Shutdown,
    Lost(TransportError),
}

//Keeps a session to the vendor API alive and feeds everything it pushes into
//the state store. Consumed by run(); hosts interact through ConnectorClient.
pub struct Connector<T> {
    transport: T,
    settings: ClientSettings,
    store: Arc<StateStore>,
    notifier: Arc<ChangeNotifier>,
    state_tx: watch::Sender<ConnectionState>,
    synced_tx: watch::Sender<bool>,
    //held so the receive loop never observes a closed channel
    command_tx: mpsc::Sender<CommandRequest>,
    command_rx: mpsc::Receiver<CommandRequest>,
    cancel: CancellationToken,
    initial_sync: InitialSync,
}

impl<T: ApiTransport> Connector<T> {
    pub fn new(transport: T, settings: ClientSettings) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);

        Self {
            transport,
            settings,
            store: Arc::new(StateStore::new()),
            notifier: Arc::new(ChangeNotifier::new()),
            state_tx: watch::channel(ConnectionState::Disconnected).0,
            synced_tx: watch::channel(false).0,
            command_tx,
            command_rx,
            cancel: CancellationToken::new(),
            initial_sync: InitialSync::AwaitingChargePoints,
        }
    }

    pub fn client(&self) -> ConnectorClient {
        ConnectorClient {
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            command_tx: self.command_tx.clone(),
            state_rx: self.state_tx.subscribe(),
            synced_rx: self.synced_tx.subscribe(),
            cancel: self.cancel.clone(),
        }
    }

    //Connect and keep listening until shutdown. Only a rejected api token
    //ends the loop with an error, everything else is retried.
    pub async fn run(mut self) -> Result<(), ConnectorError> {
        let result = self.keep_connected().await;

        //shutdown must never fail, whatever state the session is in
        if let Err(e) = self.transport.disconnect().await {
            tracing::warn!("Error closing the vendor session: {}", e);
        }
        self.set_state(ConnectionState::Disconnected);

        result
    }

    async fn keep_connected(&mut self) -> Result<(), ConnectorError> {
        loop {
            self.set_state(ConnectionState::Connecting);

            match self.transport.connect(&self.settings.api_token).await {
                Ok(()) => {}
                Err(TransportError::InvalidToken { reason }) => {
                    return Err(ConnectorError::AuthenticationFailed { reason });
                }
                Err(e) => {
                    let delay = self.retry_delay(&e, self.settings.reconnect.retry());
                    tracing::warn!(
                        "Connecting to the Blue Current websocket failed, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    self.notifier.notify_all();
                    self.set_state(ConnectionState::ReconnectWaiting);
                    if self.cancelled_during(delay).await {
                        return Ok(());
                    }
                    continue;
                }
            }

            self.set_state(ConnectionState::Connected);
            tracing::info!("Connected to the Blue Current websocket");

            if let Err(e) = self.transport.request_charge_points().await {
                tracing::error!("Error requesting the charge point list: {}", e);
            }

            let session_end = self.listen().await;

            //whatever ended the session, all cached values are now suspect
            self.notifier.notify_all();

            match session_end {
                SessionEnd::Shutdown => return Ok(()),
                SessionEnd::Lost(TransportError::InvalidToken { reason }) => {
                    return Err(ConnectorError::AuthenticationFailed { reason });
                }
                SessionEnd::Lost(e) => {
                    let delay = self.retry_delay(&e, self.settings.reconnect.connection_lost());
                    tracing::warn!(
                        "Disconnected from the Blue Current websocket, reconnecting in {:?}: {}",
                        delay,
                        e
                    );
                    self.set_state(ConnectionState::ReconnectWaiting);
                    if self.cancelled_during(delay).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn listen(&mut self) -> SessionEnd {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Shutdown,
                request = self.command_rx.recv() => {
                    if let Some(request) = request {
                        self.dispatch_command(request).await;
                    }
                }
                received = self.transport.receive() => match received {
                    Ok(msg) => self.handle_message(msg).await,
                    Err(e) => return SessionEnd::Lost(e),
                },
            }
        }
    }

    //Rate limiting gets the provider-specified reset delay, everything else
    //the configured fixed one.
    fn retry_delay(&self, error: &TransportError, fixed: Duration) -> Duration {
        match error {
            TransportError::RequestLimit => self.transport.rate_limit_reset_delay(),
            _ => fixed,
        }
    }

    async fn cancelled_during(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    async fn dispatch_command(&self, request: CommandRequest) {
        match self
            .transport
            .send_command(&request.evse_id, &request.command)
            .await
        {
            Ok(()) => tracing::debug!(
                "Sent {} to charge point {}",
                request.command.object_name(),
                request.evse_id
            ),
            Err(e) => tracing::error!(
                "Error sending {} to charge point {}: {}",
                request.command.object_name(),
                request.evse_id,
                e
            ),
        }
    }

    async fn handle_message(&mut self, msg: ApiMessage) {
        if let Some(error) = &msg.error {
            tracing::warn!("Vendor reported an error for {}: {}", msg.object, error);
            return;
        }

        match msg.topic() {
            MessageTopic::ChargePointList => self.handle_charge_point_list(&msg).await,
            MessageTopic::ChargePointValues => self.handle_charge_point_values(&msg),
            MessageTopic::GridStatus => self.handle_grid_status(&msg),
            MessageTopic::SettingResult => self.handle_setting_result(&msg),
            MessageTopic::CommandResult => self.handle_command_result(&msg),
            MessageTopic::Unknown => {
                tracing::debug!("Ignoring message with unknown object {}", msg.object);
            }
        }
    }

    async fn handle_charge_point_list(&mut self, msg: &ApiMessage) {
        let entries = match msg.charge_point_list() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Error parsing charge point list: {:?}", e);
                return;
            }
        };

        for (evse_id, attributes) in &entries {
            self.store.upsert(evse_id, attributes.clone());
        }

        //status and settings of different charge points are independent
        let transport = &self.transport;
        join_all(entries.iter().map(|(evse_id, _)| async move {
            if let Err(e) = transport.request_status(evse_id).await {
                tracing::error!("Error requesting status of {}: {}", evse_id, e);
            }
            if let Err(e) = transport.request_settings(evse_id).await {
                tracing::error!("Error requesting settings of {}: {}", evse_id, e);
            }
        }))
        .await;

        if let Some((evse_id, _)) = entries.first() {
            if let Err(e) = self.transport.request_grid_status(evse_id).await {
                tracing::error!("Error requesting grid status: {}", e);
            }
        }

        if self.initial_sync != InitialSync::Done {
            //two replies per charge point plus one grid snapshot
            let outstanding = entries.len() * 2 + usize::from(!entries.is_empty());
            if outstanding == 0 {
                self.complete_initial_sync();
            } else {
                self.initial_sync = InitialSync::AwaitingReplies(outstanding);
            }
        }
    }

    fn handle_charge_point_values(&mut self, msg: &ApiMessage) {
        let (evse_id, mut values) = match msg.charge_point_values() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!("Error parsing {} message: {:?}", msg.object, e);
                return;
            }
        };

        message::apply_value_translations(&mut values);
        self.store.upsert(&evse_id, values);
        self.note_initial_reply();
        self.notifier.notify(&ChangeTopic::ChargePoint(evse_id));
    }

    fn handle_grid_status(&mut self, msg: &ApiMessage) {
        let values = match msg.grid_values() {
            Ok(values) => values,
            Err(e) => {
                tracing::error!("Error parsing grid status: {:?}", e);
                return;
            }
        };

        self.store.set_grid(values);
        self.note_initial_reply();
        self.notifier.notify(&ChangeTopic::Grid);
    }

    fn handle_setting_result(&mut self, msg: &ApiMessage) {
        let (evse_id, result) = match msg.setting_result() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!("Error parsing {} result: {:?}", msg.object, e);
                return;
            }
        };

        let key = msg.object.to_lowercase();
        tracing::info!("{} of charge point {} was set to {}", key, evse_id, result);

        let mut values = Attributes::from([(key, result)]);
        message::apply_value_translations(&mut values);
        self.store.upsert(&evse_id, values);
        self.notifier.notify(&ChangeTopic::ChargePoint(evse_id));
    }

    fn handle_command_result(&self, msg: &ApiMessage) {
        let name = msg.object.to_lowercase();
        let evse_id = msg.evse_id().unwrap_or("unknown");

        if msg.success.unwrap_or(false) {
            tracing::info!("{} was successful for charge point {}", name, evse_id);
        } else {
            tracing::error!("{} failed for charge point {}", name, evse_id);
        }
    }

    fn note_initial_reply(&mut self) {
        if let InitialSync::AwaitingReplies(outstanding) = self.initial_sync {
            if outstanding > 1 {
                self.initial_sync = InitialSync::AwaitingReplies(outstanding - 1);
            } else {
                self.complete_initial_sync();
            }
        }
    }

    fn complete_initial_sync(&mut self) {
        self.initial_sync = InitialSync::Done;
        self.synced_tx.send_replace(true);
        tracing::info!("Received initial data of all charge points");
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!("Connection state: {} -> {}", previous, state);
        }
    }
}

//Cloneable host-side handle: read the store, subscribe to changes, send
//commands, await the initial sync, shut the connector down.
#[derive(Clone)]
pub struct ConnectorClient {
    store: Arc<StateStore>,
    notifier: Arc<ChangeNotifier>,
    command_tx: mpsc::Sender<CommandRequest>,
    state_rx: watch::Receiver<ConnectionState>,
    synced_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl ConnectorClient {
    pub fn charge_point(&self, evse_id: &str) -> Option<Attributes> {
        self.store.charge_point(evse_id)
    }

    pub fn charge_point_ids(&self) -> Vec<String> {
        self.store.charge_point_ids()
    }

    pub fn grid(&self) -> Attributes {
        self.store.grid()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn subscribe(
        &self,
        topic: ChangeTopic,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.notifier.subscribe(topic, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.notifier.unsubscribe(id);
    }

    //Fire and forget: the outcome arrives asynchronously as an
    //acknowledgment message.
    pub async fn execute(
        &self,
        evse_id: impl Into<String>,
        command: ChargePointCommand,
    ) -> Result<(), ConnectorError> {
        self.command_tx
            .send(CommandRequest {
                evse_id: evse_id.into(),
                command,
            })
            .await
            .map_err(|_| ConnectorError::ShutDown)
    }

    //wait until status, settings and grid data of every charge point from
    //the first listing have arrived
    pub async fn wait_until_synced(&self) -> Result<(), ConnectorError> {
        let mut synced_rx = self.synced_rx.clone();
        synced_rx
            .wait_for(|synced| *synced)
            .await
            .map(|_| ())
            .map_err(|_| ConnectorError::ShutDown)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
