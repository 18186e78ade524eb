//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements       | Connects to                 |
//! |--------------|------------------|-----------------------------|
//! | `mqtt`       | SessionPort      | esp-mqtt client task        |
//! | `http_fetch` | FirmwareSource   | ESP-IDF HTTP(S) client      |
//! | `ota_writer` | FirmwareWriter   | Inactive OTA app partition  |
//! |              | RestartPort      | `esp_restart`               |
//! | `wifi`       | LinkStatusPort   | ESP-IDF WiFi STA            |
//! | `nvs`        | ConfigPort       | NVS / in-memory store       |
//! | `time`       |:                | ESP32 system timer          |
//! | `device_id`  |:                | eFuse factory MAC           |

pub mod device_id;
pub mod http_fetch;
pub mod mqtt;
pub mod nvs;
pub mod ota_writer;
pub mod time;
pub mod wifi;
