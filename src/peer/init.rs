use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use tracing::debug;

type Attempt<T> = Shared<BoxFuture<'static, T>>;

struct InFlight<T: Clone> {
    id: u64,
    attempt: Attempt<T>,
}

/// Single-flight над (пере)инициализацией.
///
/// Пока попытка идёт, все новые вызовы `run` ждут её же результат. Маркер
/// снимается тем вызовом, который первым дождался завершения, поэтому после
/// любой попытки (удачной или нет) следующий `run` стартует заново.
pub struct InitializationGuard<T: Clone> {
    in_flight: Mutex<Option<InFlight<T>>>,
    attempts: Mutex<u64>,
}

impl<T: Clone> Default for InitializationGuard<T> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(None),
            attempts: Mutex::new(0),
        }
    }
}

impl<T> InitializationGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Сколько попыток реально стартовало
    pub fn attempts(&self) -> u64 {
        *self.attempts.lock()
    }

    pub async fn run<F, Fut>(&self, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (id, attempt) = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(current) => {
                    debug!(attempt = current.id, "initialization already in progress, joining");
                    (current.id, current.attempt.clone())
                }
                None => {
                    let id = {
                        let mut attempts = self.attempts.lock();
                        *attempts += 1;
                        *attempts
                    };
                    let attempt = start().boxed().shared();
                    *slot = Some(InFlight {
                        id,
                        attempt: attempt.clone(),
                    });
                    (id, attempt)
                }
            }
        };

        let outcome = attempt.await;

        let mut slot = self.in_flight.lock();
        if slot.as_ref().map(|f| f.id) == Some(id) {
            *slot = None;
        }
        outcome
    }
}
