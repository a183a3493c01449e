//! Request orchestration
//!
//! [`PhaseAnalyzer`] is the public entry point: it loads files, resolves
//! landmarks into EMG intervals and runs the engines. Every request runs to
//! completion before returning and carries its own request id in a tracing
//! span.

use crate::assembler::ResultAssembler;
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, ErrorKind};
use crate::manifest::parse_manifest;
use crate::normalizer::Normalizer;
use crate::numeric::ScaledCodec;
use crate::parsers::{EmgParser, ForceParser, MotionParser, ReferenceParser, StreamParser};
use crate::phase::{parse_phase_label, resolve, validate_phase_order, PhaseRange};
use crate::pool::{
    default_worker_count, AdmissionGate, CancelToken, MemoryPressureGate, NoProgress,
    ProgressSink, WorkerPool,
};
use crate::stats::StatisticsEngine;
use crate::sync::TimeSync;
use crate::types::{
    AnalysisRequest, EmgStream, ForceStream, Landmark, LandmarkValue, Manifest, MaxMeanReport,
    MotionStream, PhaseStats, ReferenceValues, Stats, SubjectRecord, TimeRange,
};
use crate::window::WindowEngine;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// The three streams of one manifest row
#[derive(Debug, Clone)]
pub struct Recording {
    pub record: SubjectRecord,
    pub emg: EmgStream,
    pub motion: MotionStream,
    pub force: ForceStream,
    /// Set landmarks that fall outside the stream recorded in their clock
    pub uncovered: Vec<Landmark>,
}

/// Loads recordings and runs statistics requests against them
pub struct PhaseAnalyzer {
    config: AnalysisConfig,
    codec: ScaledCodec,
    gate: Arc<dyn AdmissionGate>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancelToken,
}

impl PhaseAnalyzer {
    /// Create an analyzer; fails when `config` is out of range
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        let codec = ScaledCodec::new(config.scaling_factor)?;
        let gate = MemoryPressureGate::for_process(config.memory_limit_bytes, config.max_workers);
        Ok(Self {
            config,
            codec,
            gate: Arc::new(gate),
            progress: Arc::new(NoProgress),
            cancel: CancelToken::new(),
        })
    }

    /// Replace the admission gate used by the window engine
    pub fn with_gate(mut self, gate: Arc<dyn AdmissionGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Share a cancellation token; cancelling it aborts in-flight requests
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn codec(&self) -> ScaledCodec {
        self.codec
    }

    pub fn assembler(&self) -> ResultAssembler {
        ResultAssembler::new(self.codec, self.config.precision)
    }

    fn window_engine(&self) -> WindowEngine {
        let pool = WorkerPool::new(self.config.max_workers.min(default_worker_count()))
            .with_gate(Arc::clone(&self.gate))
            .with_progress(Arc::clone(&self.progress));
        WindowEngine::new(self.codec, pool)
    }

    fn statistics(&self) -> StatisticsEngine {
        StatisticsEngine::new(self.codec)
    }

    /// Read a whole input file, refusing files above `max_file_bytes`
    pub fn read_input(&self, path: &Path) -> Result<Vec<u8>, AnalysisError> {
        let size = fs::metadata(path)?.len();
        if size > self.config.max_file_bytes {
            return Err(AnalysisError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit: self.config.max_file_bytes,
            });
        }
        Ok(fs::read(path)?)
    }

    fn load<P: StreamParser>(&self, parser: P, path: &Path) -> Result<P::Output, AnalysisError> {
        debug!(path = %path.display(), "loading");
        parser.parse(&self.read_input(path)?)
    }

    pub fn load_manifest(&self, path: &Path) -> Result<Manifest, AnalysisError> {
        let manifest = parse_manifest(&self.read_input(path)?)?;
        debug!(subjects = manifest.len(), "manifest loaded");
        Ok(manifest)
    }

    pub fn load_emg(&self, path: &Path) -> Result<EmgStream, AnalysisError> {
        self.load(EmgParser::new(self.codec), path)
    }

    pub fn load_motion(&self, path: &Path) -> Result<MotionStream, AnalysisError> {
        self.load(MotionParser::new(self.codec), path)
    }

    pub fn load_force(&self, path: &Path) -> Result<ForceStream, AnalysisError> {
        self.load(ForceParser::new(self.codec), path)
    }

    pub fn load_reference(&self, path: &Path) -> Result<ReferenceValues, AnalysisError> {
        self.load(ReferenceParser::new(self.codec), path)
    }

    /// Subject row, resolved phase interval and EMG stream of a request
    fn prepare(
        &self,
        request: &AnalysisRequest,
    ) -> Result<(SubjectRecord, PhaseRange, EmgStream), AnalysisError> {
        let (start, end) = validate_phase_order(&request.start_phase, &request.end_phase)?;
        let manifest = self.load_manifest(&request.manifest_path)?;
        let record = manifest.subject(request.subject_index)?.clone();
        let phase = resolve(&record.landmarks, start, end, record.emg_motion_offset)?;
        debug!(
            start = phase.start_emg_time,
            end = phase.end_emg_time,
            "phase resolved"
        );
        let emg = self.load_emg(&request.data_folder.join(&record.emg_file))?;
        Ok((record, phase, emg))
    }

    /// Per-channel mean and max between the request's two landmarks
    pub fn analyze(&self, request: &AnalysisRequest) -> Result<Stats, AnalysisError> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "analyze",
            %request_id,
            start = %request.start_phase,
            end = %request.end_phase,
            subject_index = request.subject_index
        );
        let _guard = span.enter();

        let (record, phase, emg) = self.prepare(request)?;
        let slice = emg.slice_time(
            self.codec.to_scaled(phase.start_emg_time),
            self.codec.to_scaled(phase.end_emg_time),
        );
        if slice.is_empty() {
            warn!(subject = %record.subject, "no EMG samples inside the phase interval");
        }
        let stats = self.statistics().interval_stats(&record.subject, &phase, &slice);
        info!(subject = %record.subject, samples = slice.len(), "interval statistics complete");
        Ok(stats)
    }

    /// Max-of-means restricted to the interval between the request's landmarks
    pub fn max_mean_for_phase(
        &self,
        request: &AnalysisRequest,
        window_size: usize,
    ) -> Result<MaxMeanReport, AnalysisError> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "max_mean_for_phase",
            %request_id,
            start = %request.start_phase,
            end = %request.end_phase,
            window_size
        );
        let _guard = span.enter();

        let (record, phase, emg) = self.prepare(request)?;
        let report = self.window_engine().max_mean(
            &emg,
            window_size,
            Some(phase.time_range()),
            &self.cancel.child(),
        )?;
        info!(subject = %record.subject, channels = report.results.len(), "max-of-means complete");
        Ok(report)
    }

    /// Max-of-means over an EMG file, optionally within `range` (natural seconds)
    pub fn max_mean_file(
        &self,
        emg_path: &Path,
        window_size: usize,
        range: Option<TimeRange>,
    ) -> Result<MaxMeanReport, AnalysisError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("max_mean", %request_id, window_size);
        let _guard = span.enter();

        let emg = self.load_emg(emg_path)?;
        let report = self
            .window_engine()
            .max_mean(&emg, window_size, range, &self.cancel.child())?;
        info!(channels = report.results.len(), "max-of-means complete");
        Ok(report)
    }

    /// Phase-bucket statistics of one subject over the configured phase labels
    pub fn phase_breakdown(
        &self,
        manifest_path: &Path,
        data_folder: &Path,
        subject_index: usize,
    ) -> Result<PhaseStats, AnalysisError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("phase_breakdown", %request_id, subject_index);
        let _guard = span.enter();

        let manifest = self.load_manifest(manifest_path)?;
        let record = manifest.subject(subject_index)?;

        let mut intervals = Vec::with_capacity(self.config.phase_labels.len());
        for label in &self.config.phase_labels {
            let (start, end) = parse_phase_label(label)?;
            match resolve(&record.landmarks, start, end, record.emg_motion_offset) {
                Ok(phase) => intervals.push(phase.time_range()),
                Err(e) if e.kind() == ErrorKind::PhaseLookup => {
                    warn!(subject = %record.subject, phase = %label, error = %e, "phase left empty");
                    // strict bounds admit nothing in a zero-width interval
                    intervals.push(TimeRange::new(0.0, 0.0));
                }
                Err(e) => return Err(e),
            }
        }

        let emg = self.load_emg(&data_folder.join(&record.emg_file))?;
        let stats = self
            .statistics()
            .phase_bucket_stats(&emg, &intervals, &self.config.phase_labels)?;
        info!(subject = %record.subject, phases = intervals.len(), "phase breakdown complete");
        Ok(stats)
    }

    /// Load the EMG, motion and force streams named by `record`
    pub fn load_recording(
        &self,
        record: &SubjectRecord,
        data_folder: &Path,
    ) -> Result<Recording, AnalysisError> {
        let emg = self.load_emg(&data_folder.join(&record.emg_file))?;
        let motion = self.load_motion(&data_folder.join(&record.motion_file))?;
        let force = self.load_force(&data_folder.join(&record.force_file))?;

        let sync = TimeSync::new(record.emg_motion_offset);
        let mut uncovered = Vec::new();
        for landmark in Landmark::ALL {
            let value = record.landmarks.get(landmark);
            if !value.is_set() {
                continue;
            }
            let native = match value {
                LandmarkValue::MotionIndex(i) => motion
                    .coverage()
                    .is_some_and(|(first, last)| (first..=last).contains(&i)),
                LandmarkValue::ForceTime(t) => {
                    within(force.time(), self.codec.to_scaled(t))
                }
            };
            let on_emg = within(
                emg.time(),
                self.codec.to_scaled(sync.landmark_to_emg_time(value)),
            );
            if !(native && on_emg) {
                warn!(
                    subject = %record.subject,
                    %landmark,
                    native,
                    on_emg,
                    "landmark lies outside recorded coverage"
                );
                uncovered.push(landmark);
            }
        }

        Ok(Recording {
            record: record.clone(),
            emg,
            motion,
            force,
            uncovered,
        })
    }

    /// Divide an EMG file by the divisors of a reference file
    pub fn normalize_files(
        &self,
        primary_path: &Path,
        reference_path: &Path,
    ) -> Result<EmgStream, AnalysisError> {
        let primary = self.load_emg(primary_path)?;
        let reference = self.load_reference(reference_path)?;
        Normalizer::normalize(&primary, &reference)
    }
}

fn within(time: &[f64], t: f64) -> bool {
    match (time.first(), time.last()) {
        (Some(&first), Some(&last)) => first <= t && t <= last,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::NoopGate;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    const MANIFEST: &str = "subject,motionFile,forceFile,emgFile,emgMotionOffset,P0,P1,P2,S,C,D,T0,T,O,L\n\
        S01,motion.csv,force.anc,emg.csv,1,,,,0.004,0.012,,,,,\n";

    /// Odd-millisecond samples so phase boundaries never land on a sample
    fn emg_csv() -> String {
        let mut text = String::from("time,RF,VL\n");
        for i in 0..=10 {
            text.push_str(&format!("{:.3},{},{}\n", 0.001 + 0.002 * i as f64, i, 10 * i));
        }
        text
    }

    struct Fixture {
        dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("kinesync-{}", Uuid::new_v4()));
            fs::create_dir_all(&dir).unwrap();
            let fixture = Self { dir };
            fixture.write("manifest.csv", MANIFEST);
            fixture.write("emg.csv", &emg_csv());
            fixture
        }

        fn write(&self, name: &str, text: &str) {
            fs::write(self.dir.join(name), text).unwrap();
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.join(name)
        }

        fn request(&self, start: &str, end: &str) -> AnalysisRequest {
            AnalysisRequest {
                manifest_path: self.path("manifest.csv"),
                data_folder: self.dir.clone(),
                start_phase: start.into(),
                end_phase: end.into(),
                subject_index: 0,
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn analyzer(config: AnalysisConfig) -> PhaseAnalyzer {
        PhaseAnalyzer::new(config)
            .unwrap()
            .with_gate(Arc::new(NoopGate))
    }

    #[test]
    fn test_analyze_phase_interval() {
        let fx = Fixture::new();
        let a = analyzer(AnalysisConfig::default());
        let stats = a.analyze(&fx.request("S", "C")).unwrap();

        assert_eq!(stats.subject, "S01");
        assert_eq!(stats.start_phase, "S");
        assert_eq!(stats.end_phase, "C");
        assert!((stats.start_emg_time - 0.004).abs() < 1e-12);
        assert!((stats.end_emg_time - 0.012).abs() < 1e-12);
        // samples 0.005, 0.007, 0.009, 0.011
        assert_eq!(stats.channel_means["RF"], 3.5e10);
        assert_eq!(stats.channel_maxes["RF"], 5e10);
        assert_eq!(stats.channel_means["VL"], 35e10);
        assert_eq!(stats.channel_maxes["VL"], 50e10);
    }

    #[test]
    fn test_analyze_rejects_out_of_order_phases() {
        let fx = Fixture::new();
        let err = analyzer(AnalysisConfig::default())
            .analyze(&fx.request("C", "S"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PhaseLookup);
    }

    #[test]
    fn test_analyze_rejects_unset_landmark() {
        let fx = Fixture::new();
        let err = analyzer(AnalysisConfig::default())
            .analyze(&fx.request("S", "L"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PhaseLookup);
    }

    #[test]
    fn test_max_mean_for_phase() {
        let fx = Fixture::new();
        let report = analyzer(AnalysisConfig::default())
            .max_mean_for_phase(&fx.request("S", "C"), 2)
            .unwrap();
        let rf = report.results[0];
        assert_eq!(rf.channel_index, 1);
        assert_eq!(rf.max_mean, 4.5e10);
        assert_eq!(rf.best_start_time, 9e7);
        assert_eq!(rf.best_end_time, 11e7);
        assert_eq!(report.range_start, 5e7);
        assert_eq!(report.range_end, 11e7);
    }

    #[test]
    fn test_max_mean_file_insufficient_data() {
        let fx = Fixture::new();
        let err = analyzer(AnalysisConfig::default())
            .max_mean_file(&fx.path("emg.csv"), 12, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
    }

    #[test]
    fn test_phase_breakdown_leaves_unset_phases_empty() {
        let fx = Fixture::new();
        let config = AnalysisConfig {
            phase_labels: vec!["S-C".into(), "C-L".into()],
            ..Default::default()
        };
        let stats = analyzer(config)
            .phase_breakdown(&fx.path("manifest.csv"), &fx.dir, 0)
            .unwrap();

        assert_eq!(stats.labels, vec!["S-C", "C-L"]);
        let rf = stats.buckets[0][0].unwrap();
        assert_eq!(rf.mean, 3.5e10);
        assert_eq!(rf.max, 5e10);
        assert_eq!(stats.buckets[1], vec![None, None]);
        assert_eq!(stats.peak_times[0], Some(21e7));
    }

    #[test]
    fn test_file_size_guard() {
        let fx = Fixture::new();
        let config = AnalysisConfig {
            max_file_bytes: 16,
            ..Default::default()
        };
        let err = analyzer(config)
            .load_manifest(&fx.path("manifest.csv"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileTooLarge);
    }

    #[test]
    fn test_normalize_files() {
        let fx = Fixture::new();
        fx.write("mvc.csv", "label,RF,VL\nMVC,2,10\n");
        let a = analyzer(AnalysisConfig::default());
        let out = a
            .normalize_files(&fx.path("emg.csv"), &fx.path("mvc.csv"))
            .unwrap();
        assert_eq!(out.len(), 11);
        assert_eq!(out.original_time_precision(), 3);
        assert_eq!(out.channels().channel("RF").unwrap()[4], 2e10);
        assert_eq!(out.channels().channel("VL").unwrap()[4], 4e10);
    }

    #[test]
    fn test_load_recording_reports_uncovered_landmarks() {
        let fx = Fixture::new();
        fx.write(
            "manifest.csv",
            "subject,motionFile,forceFile,emgFile,emgMotionOffset,P0,P1,P2,S,C,D,T0,T,O,L\n\
             S01,motion.csv,force.anc,emg.csv,1,,,,0.004,0.012,3,,,40,\n",
        );
        fx.write("motion.csv", "Trajectories\n250\n,,\nindex,HipX\n1,0\n2,0\n3,0\n4,0\n");
        let mut force = String::from("#Channels\t1\n");
        for i in 0..=20 {
            force.push_str(&format!("{:.3}\t{}\n", i as f64 * 0.001, i));
        }
        fx.write("force.anc", &force);

        let a = analyzer(AnalysisConfig::default());
        let manifest = a.load_manifest(&fx.path("manifest.csv")).unwrap();
        let recording = a.load_recording(manifest.subject(0).unwrap(), &fx.dir).unwrap();

        assert_eq!(recording.motion.len(), 4);
        assert_eq!(recording.force.len(), 21);
        // O = frame 40 lies beyond both the motion and EMG recordings
        assert_eq!(recording.uncovered, vec![Landmark::O]);
    }

    #[test]
    fn test_cancelled_token_aborts_window_requests() {
        let fx = Fixture::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = analyzer(AnalysisConfig::default())
            .with_cancel_token(cancel)
            .max_mean_file(&fx.path("emg.csv"), 2, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
