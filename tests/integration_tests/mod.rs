//! End-to-end flows over the in-memory backends

mod backlog_flow;
mod politeness_flow;
