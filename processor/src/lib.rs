pub mod dispatcher;
pub mod error;
pub mod event_filter;
pub mod gc;
pub mod initializer;
pub mod job_materializer;
pub mod job_reconciler;
pub mod reconciler;
pub mod runner;
pub mod status_propagator;
pub mod validator;

#[cfg(test)]
mod testing;
