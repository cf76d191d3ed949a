/// A counter readout interleaved with event data. Carries no identity beyond arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScalerSnapshot {
    pub values: Vec<u32>,
}

impl ScalerSnapshot {
    pub fn new(values: Vec<u32>) -> Self {
        Self { values }
    }
}

/// The receiving end of scaler snapshots.
///
/// `accept` is called once per snapshot, in arrival order, from inside the decode call that
/// read it. Implementors must not hold on to the unpacker; they never see event data.
pub trait ScalerSink {
    fn accept(&mut self, values: &[u32]);
}

impl<K: ScalerSink + ?Sized> ScalerSink for &mut K {
    fn accept(&mut self, values: &[u32]) {
        (**self).accept(values)
    }
}

/// A sink for callers who only care about the ScalerEmitted status
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardScalers;

impl ScalerSink for DiscardScalers {
    fn accept(&mut self, _values: &[u32]) {}
}

/// ScalerTotals is a simple registry which sums every snapshot per counter.
///
/// Snapshots are treated as increments since the previous readout. Snapshots of differing
/// length extend the registry as needed.
#[derive(Debug, Clone, Default)]
pub struct ScalerTotals {
    totals: Vec<u64>,
    snapshot_count: u64,
}

impl ScalerTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> &[u64] {
        &self.totals
    }

    pub fn snapshot_count(&self) -> u64 {
        self.snapshot_count
    }
}

impl ScalerSink for ScalerTotals {
    fn accept(&mut self, values: &[u32]) {
        if self.totals.len() < values.len() {
            self.totals.resize(values.len(), 0);
        }
        for (total, value) in self.totals.iter_mut().zip(values) {
            *total += *value as u64;
        }
        self.snapshot_count += 1;
    }
}
