//! Реализация паттерна "Автоматический выключатель" для вызовов платёжного шлюза.
//!
//! После `failure_threshold` подряд транспортных сбоев выключатель размыкается и
//! запросы к шлюзу отклоняются сразу, не уходя в сеть. Через `timeout` разрешается
//! один пробный запрос (HalfOpen): успех замыкает цепь, сбой снова размыкает.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Состояния выключателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Нормальный режим работы, запросы разрешены.
    Closed,
    /// Запросы временно запрещены после серии сбоев.
    Open,
    /// Разрешён пробный запрос для проверки, восстановился ли шлюз.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            failure_threshold: failure_threshold.max(1),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Можно ли выполнить следующий запрос к шлюзу.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.timeout)
                    .unwrap_or(true);
                if expired {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
            // Один пробный запрос за раз
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Разрешение на один вызов шлюза. Исход фиксируется через
    /// [`CallPermit::success`] / [`CallPermit::failure`]; если вызов отменили
    /// раньше, пробный слот HalfOpen освобождается при Drop.
    pub fn acquire(&self) -> Option<CallPermit<'_>> {
        self.can_execute().then(|| CallPermit {
            breaker: self,
            finished: false,
        })
    }

    /// Вызов прерван без ответа шлюза: счётчики не трогаем, но следующий
    /// пробный запрос снова разрешён.
    fn release(&self) {
        let mut inner = self.lock();
        if inner.probe_in_flight {
            inner.probe_in_flight = false;
            warn!("Circuit breaker probe was cancelled - next request may probe again");
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    inner.failure_count, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker probe failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }
}

/// Выданное выключателем разрешение на вызов.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    finished: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self) {
        self.finished = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.finished = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        for _ in 0..2 {
            breaker.record_failure();
            assert!(breaker.can_execute());
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn success_resets_failures() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 1);
    }

    #[test]
    fn half_open_allows_single_probe() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.can_execute());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn dropped_probe_frees_half_open_slot() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();

        let permit = breaker.acquire().expect("half-open probe allowed");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.acquire().is_none());

        drop(permit);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.failure_count(), 1);

        let permit = breaker.acquire().expect("new probe after cancellation");
        permit.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn completed_permit_records_outcome_once() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.acquire().unwrap().failure();
        assert_eq!(breaker.failure_count(), 1);
        // Закрытая цепь: Drop без исхода ничего не меняет
        drop(breaker.acquire().unwrap());
        assert_eq!(breaker.failure_count(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
