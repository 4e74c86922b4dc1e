
#![no_std]

#[cfg(test)]
extern crate std;

pub mod timer;

pub mod error;

pub mod config;

pub mod buffer;

pub mod addr;

pub mod tlv;

pub mod coap;

pub mod neighbor;

pub mod mac;

pub mod sixlo;

pub mod forwarder;

pub mod resolver;

pub mod leader;

pub mod netif;

