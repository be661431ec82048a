//! The pure reducer contract.

use std::sync::Arc;

use crate::effect::Effect;

/// A pure transition function `(state, action, environment) -> Effect`.
///
/// Invoked synchronously by the transition loop: it must not suspend and
/// must not fail. All asynchronous work is described by the returned
/// [`Effect`] and executed outside the transition.
///
/// Stored as a shared closure so a store and a test store can run the same
/// definition.
pub struct Reducer<S, A: Send + 'static, E> {
    reduce: Arc<dyn Fn(&mut S, A, &E) -> Effect<A> + Send + Sync>,
}

impl<S, A: Send + 'static, E> Clone for Reducer<S, A, E> {
    fn clone(&self) -> Self {
        Self {
            reduce: Arc::clone(&self.reduce),
        }
    }
}

impl<S, A: Send + 'static, E> Reducer<S, A, E> {
    /// Wrap a transition function.
    pub fn new<F>(reduce: F) -> Self
    where
        F: Fn(&mut S, A, &E) -> Effect<A> + Send + Sync + 'static,
    {
        Self {
            reduce: Arc::new(reduce),
        }
    }

    /// Apply one action.
    pub fn reduce(&self, state: &mut S, action: A, environment: &E) -> Effect<A> {
        (self.reduce)(state, action, environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_mutates_state_in_place() {
        let reducer = Reducer::new(|state: &mut u32, action: u32, _env: &()| {
            *state += action;
            Effect::none()
        });

        let mut state = 1;
        let effect = reducer.reduce(&mut state, 41, &());
        assert_eq!(state, 42);
        assert!(effect.is_none());
    }
}
