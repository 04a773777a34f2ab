//! Integration tests for the endpoint core.
//!
//! Organization:
//!
//! - `harness.rs`   - loopback endpoint pairs over in-process pipes,
//!                    plus a frame-tapping channel that counts packets
//!                    per opcode
//! - `calls.rs`     - call round trips, concurrency, exception and
//!                    timeout surfacing
//! - `copies.rs`    - chunked tensor transfers and boundary sizes
//! - `handshake.rs` - init-key exchange and protocol-version checks at
//!                    the wire level
//! - `shutdown.rs`  - clean and unclean connection teardown
//! - `multihop.rs`  - handle forwarding across proxied endpoints

mod calls;
