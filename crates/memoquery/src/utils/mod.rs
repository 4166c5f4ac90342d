pub mod inflight;
