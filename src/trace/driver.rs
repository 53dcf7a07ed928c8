//! Recording decorator around any [`ThermocyclerDriver`].

use super::{TraceEntry, TraceRecorder};
use crate::error::DriverResult;
use crate::hardware::capabilities::ThermocyclerDriver;
use crate::hardware::types::{DeviceInfo, LidStatus, PlateTemperature, Temperature};
use async_trait::async_trait;

/// Records every call (name + normalized arguments) before delegating.
///
/// Entries are written in issue order, including calls that go on to fail:
/// the instruction was still issued.
pub struct TracingDriver {
    inner: Box<dyn ThermocyclerDriver>,
    recorder: TraceRecorder,
}

impl TracingDriver {
    /// Wrap `inner`, recording into `recorder`.
    pub fn new(inner: impl ThermocyclerDriver + 'static, recorder: TraceRecorder) -> Self {
        Self::from_boxed(Box::new(inner), recorder)
    }

    /// Wrap an already boxed driver.
    pub fn from_boxed(inner: Box<dyn ThermocyclerDriver>, recorder: TraceRecorder) -> Self {
        Self { inner, recorder }
    }

    /// Handle to the recorder this driver writes into.
    pub fn recorder(&self) -> &TraceRecorder {
        &self.recorder
    }

    fn record(&self, operation: &str) {
        self.recorder.record(TraceEntry::call(operation));
    }

    fn record_with<'a>(
        &self,
        operation: &str,
        args: impl IntoIterator<Item = (&'a str, Option<f64>)>,
    ) {
        self.recorder.record(TraceEntry::call_with(operation, args));
    }
}

#[async_trait]
impl ThermocyclerDriver for TracingDriver {
    async fn connect(&self) -> DriverResult<()> {
        self.record("connect");
        self.inner.connect().await
    }

    async fn disconnect(&self) -> DriverResult<()> {
        self.record("disconnect");
        self.inner.disconnect().await
    }

    async fn is_connected(&self) -> bool {
        self.record("is_connected");
        self.inner.is_connected().await
    }

    async fn open_lid(&self) -> DriverResult<()> {
        self.record("open_lid");
        self.inner.open_lid().await
    }

    async fn close_lid(&self) -> DriverResult<()> {
        self.record("close_lid");
        self.inner.close_lid().await
    }

    async fn get_lid_status(&self) -> DriverResult<LidStatus> {
        self.record("get_lid_status");
        self.inner.get_lid_status().await
    }

    async fn get_lid_temperature(&self) -> DriverResult<Temperature> {
        self.record("get_lid_temperature");
        self.inner.get_lid_temperature().await
    }

    async fn set_plate_temperature(
        &self,
        temp: f64,
        hold_time: Option<f64>,
        volume: Option<f64>,
    ) -> DriverResult<()> {
        self.record_with(
            "set_plate_temperature",
            [("temp", Some(temp)), ("hold", hold_time), ("volume", volume)],
        );
        self.inner.set_plate_temperature(temp, hold_time, volume).await
    }

    async fn get_plate_temperature(&self) -> DriverResult<PlateTemperature> {
        self.record("get_plate_temperature");
        self.inner.get_plate_temperature().await
    }

    async fn set_ramp_rate(&self, ramp_rate: f64) -> DriverResult<()> {
        self.record_with("set_ramp_rate", [("ramp_rate", Some(ramp_rate))]);
        self.inner.set_ramp_rate(ramp_rate).await
    }

    async fn set_temperature(
        &self,
        temp: f64,
        hold_time: Option<f64>,
        ramp_rate: Option<f64>,
        volume: Option<f64>,
    ) -> DriverResult<()> {
        self.record_with(
            "set_temperature",
            [
                ("temp", Some(temp)),
                ("hold", hold_time),
                ("ramp_rate", ramp_rate),
                ("volume", volume),
            ],
        );
        self.inner
            .set_temperature(temp, hold_time, ramp_rate, volume)
            .await
    }

    async fn set_lid_temperature(&self, temp: Option<f64>) -> DriverResult<()> {
        self.record_with("set_lid_temperature", [("temp", temp)]);
        self.inner.set_lid_temperature(temp).await
    }

    async fn deactivate_lid(&self) -> DriverResult<()> {
        self.record("deactivate_lid");
        self.inner.deactivate_lid().await
    }

    async fn deactivate_block(&self) -> DriverResult<()> {
        self.record("deactivate_block");
        self.inner.deactivate_block().await
    }

    async fn deactivate_all(&self) -> DriverResult<()> {
        self.record("deactivate_all");
        self.inner.deactivate_all().await
    }

    async fn get_device_info(&self) -> DriverResult<DeviceInfo> {
        self.record("get_device_info");
        self.inner.get_device_info().await
    }

    async fn enter_programming_mode(&self) -> DriverResult<()> {
        self.record("enter_programming_mode");
        self.inner.enter_programming_mode().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatingDriver;

    #[tokio::test]
    async fn records_calls_in_issue_order() {
        let recorder = TraceRecorder::new();
        let driver = TracingDriver::new(SimulatingDriver::new(), recorder.clone());

        driver.close_lid().await.unwrap();
        driver.set_lid_temperature(None).await.unwrap();
        driver.set_temperature(60.0, None, Some(1.5), Some(25.0)).await.unwrap();

        let trace = recorder.finish();
        let text = trace.to_text();
        assert_eq!(
            text,
            "close_lid\nset_lid_temperature\nset_temperature ramp_rate=1.5 temp=60 volume=25\n"
        );
    }

    #[tokio::test]
    async fn delegates_state_changes() {
        let driver = TracingDriver::new(SimulatingDriver::new(), TraceRecorder::new());
        driver.close_lid().await.unwrap();
        assert_eq!(driver.get_lid_status().await.unwrap(), LidStatus::Closed);
        assert_eq!(driver.recorder().len(), 2);
    }
}
