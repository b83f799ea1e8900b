//! ESP32-S3 platform glue for the tickerboard firmware: bounded Wi-Fi
//! bring-up, the quote HTTP transport, SNTP time sync, the flash-backed
//! state store, and battery sensing.
#![no_std]

pub mod battery;
pub mod network;
pub mod storage;
