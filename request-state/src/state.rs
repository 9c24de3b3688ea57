use serde_json::Value;
use tokio::sync::watch;

/// Observable state of one consumer's request.
///
/// While `is_loading` is set, nothing terminal has been committed since the
/// current request began.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestState {
    pub data: Option<Value>,
    pub error: Option<String>,
    pub is_loading: bool,
}

impl RequestState {
    pub fn is_success(&self) -> bool {
        !self.is_loading && self.error.is_none() && self.data.is_some()
    }

    pub fn is_error(&self) -> bool {
        !self.is_loading && self.error.is_some()
    }
}

pub type StateSender = watch::Sender<RequestState>;
pub type StateReceiver = watch::Receiver<RequestState>;

/// Transitions the coordinator applies to a consumer's state
pub(crate) trait StateTransitions {
    fn begin_loading(&self);
    fn join_loading(&self);
    fn succeed(&self, data: Value);
    fn fail(&self, message: String);
    fn finish_loading(&self);
}

impl StateTransitions for StateSender {
    fn begin_loading(&self) {
        self.send_modify(|state| {
            state.is_loading = true;
            state.error = None;
        });
    }

    fn join_loading(&self) {
        self.send_modify(|state| state.is_loading = true);
    }

    fn succeed(&self, data: Value) {
        self.send_modify(|state| {
            state.data = Some(data);
            state.error = None;
        });
    }

    fn fail(&self, message: String) {
        self.send_modify(|state| state.error = Some(message));
    }

    fn finish_loading(&self) {
        self.send_modify(|state| state.is_loading = false);
    }
}
