use crate::handoff::bridge::PlotHandoff;
use crate::handoff::model::PlotProfile;
use crate::workflow::config::WorkflowConfig;
use crate::workflow::discovery::{discover_sessions, SessionSource};
use anyhow::Context;
use chrono::Datelike;
use lidarcore::atmosphere::MolecularModel;
use lidarcore::instrument::{DetectionMode, FrameDecoder, RawFrame};
use lidarcore::processing::correction::range_correct;
use lidarcore::processing::{
    mean_corrected_profile, ChannelGluer, CorrectedFrame, GluedProfile, MeasurementSession,
    SessionAggregate,
};
use lidarcore::retrieval::{KfsInversion, RamanRetrieval};
use lidarcore::storage::LevelFiles;
use lidarcore::telemetry::{MetricsRecorder, MetricsSnapshot};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of one session that ran to completion. Wavelength-level failures
/// do not fail the session.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub id: String,
    pub accepted_frames: usize,
    pub quarantined_frames: usize,
    pub rejected_frames: usize,
    pub level_files: usize,
    pub glued: Vec<u32>,
    pub handoffs: Vec<PathBuf>,
    pub wavelength_failures: Vec<(u32, String)>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub sessions: Vec<SessionReport>,
    pub failures: Vec<(String, String)>,
    pub metrics: MetricsSnapshot,
}

#[derive(Clone)]
pub struct Runner {
    config: Arc<WorkflowConfig>,
    metrics: Arc<MetricsRecorder>,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    /// Processes every discovered session, each in its own blocking task.
    pub fn run(&self) -> anyhow::Result<RunSummary> {
        let sessions = discover_sessions(&self.config.data_dir)?;
        log::info!(
            "discovered {} sessions in {}",
            sessions.len(),
            self.config.data_dir.display()
        );
        let workers = self.config.workers.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .max_blocking_threads(workers)
            .enable_all()
            .build()
            .context("building session worker runtime")?;

        let (reports, failures) = runtime.block_on(async {
            let mut handles = Vec::with_capacity(sessions.len());
            for source in sessions {
                let runner = self.clone();
                let id = source.id.clone();
                handles.push((
                    id,
                    tokio::task::spawn_blocking(move || runner.process_session(&source)),
                ));
            }
            let mut reports = Vec::new();
            let mut failures = Vec::new();
            for (id, handle) in handles {
                let outcome = match handle.await {
                    Ok(result) => result,
                    Err(err) => Err(anyhow::anyhow!("session task aborted: {}", err)),
                };
                match outcome {
                    Ok(report) => reports.push(report),
                    Err(err) => {
                        log::error!("[{}] session failed: {:#}", id, err);
                        self.metrics.record_error();
                        failures.push((id, format!("{:#}", err)));
                    }
                }
            }
            (reports, failures)
        });

        Ok(RunSummary {
            sessions: reports,
            failures,
            metrics: self.metrics.snapshot(),
        })
    }

    pub fn process_session(&self, source: &SessionSource) -> anyhow::Result<SessionReport> {
        let pipeline = &self.config.pipeline;
        let id = source.id.as_str();
        let decoder =
            FrameDecoder::new(pipeline.decoder.clone()).context("building frame decoder")?;
        let measured = decoder.triage(&source.measurements);
        let dark = decoder.triage(&source.dark_current);
        let mut report = SessionReport {
            id: id.to_string(),
            accepted_frames: measured.accepted.len(),
            quarantined_frames: measured.quarantined.len() + dark.quarantined.len(),
            rejected_frames: measured.rejected.len() + dark.rejected.len(),
            ..Default::default()
        };
        self.metrics.record_quarantined(report.quarantined_frames);

        let frames: Vec<RawFrame> = measured.accepted.into_iter().map(|(_, f)| f).collect();
        let darks: Vec<RawFrame> = dark.accepted.into_iter().map(|(_, f)| f).collect();
        let session = MeasurementSession::new(id, source.period, frames, darks)
            .with_context(|| format!("assembling session {}", id))?;
        let aggregate = SessionAggregate::build(session, &pipeline.correction)
            .with_context(|| format!("averaging dark current of {}", id))?;

        let levels = LevelFiles::new(self.config.output_dir.join(id));
        for frame in aggregate.session().measurements() {
            levels
                .write_raw(frame)
                .with_context(|| format!("writing level 0 of {}", frame.header().file_name))?;
            report.level_files += 1;
        }
        let template = aggregate
            .session()
            .measurements()
            .first()
            .with_context(|| format!("session {} has no frames", id))?;
        levels
            .write_dark_current(aggregate.dark_current(), template)
            .with_context(|| format!("writing dark-current mean of {}", id))?;
        report.level_files += 1;

        let corrected = aggregate
            .correct_all()
            .with_context(|| format!("correcting frames of {}", id))?;
        for frame in &corrected {
            levels
                .write_corrected(frame)
                .with_context(|| format!("writing level 1 of {}", frame.header.file_name))?;
            report.level_files += 2;
        }
        self.metrics.record_corrected(corrected.len());
        let mean = mean_corrected_profile(&corrected)
            .with_context(|| format!("averaging corrected frames of {}", id))?;

        let gluer = ChannelGluer::new(pipeline.glue.clone());
        let mut glued = BTreeMap::new();
        for &wavelength in &pipeline.glue.wavelengths {
            match gluer.glue_frame(&mean, wavelength) {
                Ok(profile) => {
                    log::info!(
                        "[{}] {} nm glued at bins {}..{} (score {:.3})",
                        id,
                        wavelength,
                        profile.window_start,
                        profile.window_end,
                        profile.score
                    );
                    report.glued.push(wavelength);
                    glued.insert(wavelength, profile);
                }
                Err(err) => {
                    log::error!("[{}] {} nm not glued: {}", id, wavelength, err);
                    report.wavelength_failures.push((wavelength, err.to_string()));
                }
            }
        }

        let handoff = PlotHandoff::new(&self.config.output_dir, id);
        let kfs_wavelength = pipeline.kfs.wavelength;
        match self.retrieve_kfs(id, &mean, &glued, &handoff) {
            Ok(paths) => report.handoffs.extend(paths),
            Err(err) => {
                log::error!("[{}] {} nm KFS failed: {:#}", id, kfs_wavelength, err);
                report
                    .wavelength_failures
                    .push((kfs_wavelength, format!("{:#}", err)));
            }
        }
        if pipeline.raman.enabled {
            let raman_wavelength = pipeline.raman.raman_wavelength;
            match self.retrieve_raman(id, &mean, &glued, &handoff) {
                Ok(path) => report.handoffs.push(path),
                Err(err) => {
                    log::error!("[{}] {} nm Raman failed: {:#}", id, raman_wavelength, err);
                    report
                        .wavelength_failures
                        .push((raman_wavelength, format!("{:#}", err)));
                }
            }
        }

        self.metrics.record_processed();
        log::info!(
            "[{}] done: {} frames, {} level files, {} hand-offs",
            id,
            report.accepted_frames,
            report.level_files,
            report.handoffs.len()
        );
        Ok(report)
    }

    fn retrieve_kfs(
        &self,
        id: &str,
        mean: &CorrectedFrame,
        glued: &BTreeMap<u32, GluedProfile>,
        handoff: &PlotHandoff,
    ) -> anyhow::Result<Vec<PathBuf>> {
        let config = &self.config.pipeline.kfs;
        let signal = select_signal(mean, glued, config.wavelength, config.use_glued)?;
        let model = MolecularModel::new(self.config.pipeline.molecular.clone());
        let mut molecular = model
            .build(
                config.wavelength,
                signal.len(),
                mean.vertical_resolution,
                mean.header.station_altitude,
                mean.header.start,
            )
            .with_context(|| {
                format!(
                    "building {} nm molecular profile from {:?} atmosphere",
                    config.wavelength,
                    model.config().source
                )
            })?;
        model
            .calibrate(&mut molecular, &signal)
            .with_context(|| format!("fitting {} nm molecular scale", config.wavelength))?;

        let inversion = KfsInversion::new(config.clone()).context("building KFS inversion")?;
        let range_corrected = range_correct(&signal, mean.vertical_resolution);
        let aerosol = inversion
            .invert(&range_corrected, &molecular, mean.header.start.month())
            .with_context(|| format!("inverting {} nm", config.wavelength))?;

        Ok(vec![
            handoff.publish(id, &mean.header, PlotProfile::Molecular(molecular))?,
            handoff.publish(id, &mean.header, PlotProfile::Aerosol(aerosol))?,
        ])
    }

    fn retrieve_raman(
        &self,
        id: &str,
        mean: &CorrectedFrame,
        glued: &BTreeMap<u32, GluedProfile>,
        handoff: &PlotHandoff,
    ) -> anyhow::Result<PathBuf> {
        let pipeline = &self.config.pipeline;
        let config = &pipeline.raman;
        let use_glued = pipeline.glue.wavelengths.contains(&config.raman_wavelength);
        let signal = select_signal(mean, glued, config.raman_wavelength, use_glued)?;
        let atmosphere = MolecularModel::new(pipeline.molecular.clone())
            .build(
                config.elastic_wavelength,
                signal.len(),
                mean.vertical_resolution,
                mean.header.station_altitude,
                mean.header.start,
            )
            .with_context(|| format!("building atmosphere for {} nm Raman", config.raman_wavelength))?
            .atmosphere();
        let retrieval = RamanRetrieval::new(config.clone()).context("building Raman retrieval")?;
        let aerosol = retrieval
            .retrieve(
                &range_correct(&signal, mean.vertical_resolution),
                &atmosphere,
                mean.vertical_resolution,
            )
            .with_context(|| format!("retrieving {} nm Raman extinction", config.elastic_wavelength))?;
        handoff.publish(id, &mean.header, PlotProfile::Aerosol(aerosol))
    }
}

/// Glued profile when requested, the analog channel otherwise. A requested
/// glue that failed is an error for that wavelength.
fn select_signal(
    mean: &CorrectedFrame,
    glued: &BTreeMap<u32, GluedProfile>,
    wavelength: u32,
    use_glued: bool,
) -> anyhow::Result<Vec<f64>> {
    if use_glued {
        return glued
            .get(&wavelength)
            .map(|profile| profile.samples.clone())
            .with_context(|| format!("no glued {} nm profile", wavelength));
    }
    Ok(mean
        .require(&DetectionMode::Analog.label(wavelength))?
        .samples
        .clone())
}
