use crate::enums::ScanMode;

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub top_k: usize,
    pub num_probes: usize,
    pub use_hacc: bool,
    pub scan_mode: ScanMode,
}

impl SearchParams {
    pub fn new(top_k: usize, num_probes: usize) -> Self {
        Self {
            top_k,
            num_probes,
            use_hacc: true,
            scan_mode: ScanMode::FastScan,
        }
    }

    pub fn with_hacc(mut self, use_hacc: bool) -> Self {
        self.use_hacc = use_hacc;
        self
    }

    pub fn with_scan_mode(mut self, scan_mode: ScanMode) -> Self {
        self.scan_mode = scan_mode;
        self
    }
}
