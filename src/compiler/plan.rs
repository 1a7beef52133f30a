// OutputPlan: structured description of what a job produces and where,
// consumed by the Job Service to surface URLs on the Job record (spec.md §4.2).

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    Udp,
    Rtmp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryOutput {
    Hls {
        base_dir: String,
        master_playlist_path: String,
        public_master_url: String,
        segment_pattern: String,
    },
    File {
        output_file_path: String,
        public_download_url: Option<String>,
    },
    Stream {
        destination_url: String,
        kind: StreamKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlan {
    pub primary: PrimaryOutput,
    /// Destinations for auxiliary UDP/RTMP outputs beyond the primary one
    /// (spec.md §9: "multi-output as primary + zero-or-more auxiliaries
    /// limited to UDP/RTMP").
    pub auxiliary_outputs: Vec<String>,
}
