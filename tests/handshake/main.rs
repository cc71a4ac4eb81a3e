mod common;

mod capacity;
mod concurrency;
mod failures;
mod psk;
mod retransmit;
mod rpk;
mod x509;
