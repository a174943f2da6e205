//! Blocking delay for controller tasks.
//!
//! Yields to the scheduler on ESP-IDF (`vTaskDelay` via `FreeRtos`);
//! sleeps the thread elsewhere.

use embedded_hal::delay::DelayNs;

#[derive(Debug, Default, Clone, Copy)]
pub struct TaskDelay;

impl TaskDelay {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "espidf")]
impl DelayNs for TaskDelay {
    fn delay_ns(&mut self, ns: u32) {
        // Below one tick FreeRTOS cannot yield; round up to 1 ms.
        esp_idf_hal::delay::FreeRtos::delay_ms(ns.div_ceil(1_000_000).max(1));
    }

    fn delay_ms(&mut self, ms: u32) {
        esp_idf_hal::delay::FreeRtos::delay_ms(ms);
    }
}

#[cfg(not(target_os = "espidf"))]
impl DelayNs for TaskDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }
}
