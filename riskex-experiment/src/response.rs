use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use riskex_core::{PlacedStimulus, Target};
use tokio::sync::oneshot;

type Claim = Arc<Mutex<Option<oneshot::Sender<Target>>>>;

/// One response window: every handler shares a single claim, and whichever
/// takes it first (a click or the timeout) decides the trial.
pub struct ResponseWindow {
    claim: Claim,
    receiver: oneshot::Receiver<Target>,
}

/// Click handler bound to one target of an open window.
#[derive(Clone)]
pub struct ResponseHandler {
    target: Target,
    claim: Claim,
}

impl ResponseWindow {
    pub fn open(targets: &[Target]) -> (Self, Vec<ResponseHandler>) {
        let (sender, receiver) = oneshot::channel();
        let claim: Claim = Arc::new(Mutex::new(Some(sender)));
        let handlers = targets
            .iter()
            .map(|&target| ResponseHandler {
                target,
                claim: Arc::clone(&claim),
            })
            .collect();
        (Self { claim, receiver }, handlers)
    }

    /// Waits for the first response or for `timeout`, whichever comes first.
    ///
    /// Returns `None` on timeout. Handlers fired after this returns are
    /// ignored.
    pub async fn resolve<F>(mut self, timeout: F) -> Option<Target>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(timeout);
        tokio::select! {
            biased;
            response = &mut self.receiver => response.ok(),
            () = &mut timeout => self.close(),
        }
    }

    // A handler may have claimed the window in the same tick the timer
    // fired; its response stands.
    fn close(&mut self) -> Option<Target> {
        if self.claim.lock().take().is_some() {
            return None;
        }
        self.receiver.try_recv().ok()
    }
}

impl Drop for ResponseWindow {
    fn drop(&mut self) {
        self.claim.lock().take();
    }
}

impl ResponseHandler {
    pub fn target(&self) -> Target {
        self.target
    }

    /// Claims the window for this handler's target. Returns false if the
    /// window already resolved.
    pub fn fire(&self) -> bool {
        let mut claim = self.claim.lock();
        match claim.take() {
            Some(sender) => sender.send(self.target).is_ok(),
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.claim.lock().is_some()
    }
}

/// Where responses come from: a touch screen, a mouse, a scripted subject.
pub trait InputSource: Send {
    /// Called once per response window with the stimuli on screen and one
    /// handler per clickable target.
    fn arm(&mut self, on_screen: &[PlacedStimulus], handlers: Vec<ResponseHandler>);

    /// Called when the window has resolved.
    fn disarm(&mut self) {}
}
