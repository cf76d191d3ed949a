/// Progress message sent from a processing worker to whoever is watching (typically the UI).
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub input_number: usize,
    pub worker_id: usize,
}

impl WorkerStatus {
    pub fn new(progress: f32, input_number: usize, worker_id: usize) -> Self {
        Self {
            progress,
            input_number,
            worker_id,
        }
    }
}
