use tracing::{span, Level, Span};

pub fn op_span(name: &str, depth: usize) -> Span {
    span!(Level::DEBUG, "op", op = %name, depth = depth, latency_ms = tracing::field::Empty)
}

pub fn observe_latency(span: &Span, latency_ms: u64) {
    span.record("latency_ms", latency_ms);
}
