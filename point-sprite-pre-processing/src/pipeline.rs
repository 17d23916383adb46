/// Manifest-to-atlas ingestion driver.
///
/// Sequences scanning, layout planning, per-record acquisition, packing and
/// vertex emission, and flushes atlases at grid boundaries.
use crate::acquire::{HttpFetcher, ImageAcquirer, RemoteFetch, TransferBuffer};
use crate::atlas::AtlasPacker;
use crate::config::PipelineConfig;
use crate::error::{AcquireError, PipelineError};
use crate::layout::AtlasLayout;
use crate::manifest::{ManifestReader, ManifestRecord, scan_manifest};
use crate::sink::AtlasSink;
use crate::thumbnail::make_thumbnail;
use crate::vertex::{VertexEmitter, VertexRecord};
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::path::Path;
use std::time::Duration;

/// Driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    ScanningManifest,
    PlanningLayout,
    Ready,
    Processing,
    Draining,
    Done,
}

/// Counters collected over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub record_count: u64,
    pub records_processed: u64,
    pub atlases_finalized: u64,
    pub thumbnails_placed: u64,
    /// Cells painted with the fallback colour after a failed acquisition.
    pub fallback_cells: u64,
    /// Lines whose coordinates were missing or unparseable.
    pub malformed_lines: u64,
    /// Lines that named no image.
    pub unnamed_sources: u64,
    pub remote_fetches: u64,
    pub bytes_fetched: u64,
    pub peak_transfer_capacity: u64,
}

/// A scanned manifest with its layout, ready to process.
pub struct PreparedManifest<R> {
    reader: R,
    layout: AtlasLayout,
}

impl<R> PreparedManifest<R> {
    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    /// Vertex records the caller must allocate before `run`.
    pub fn record_count(&self) -> u64 {
        self.layout.record_count
    }
}

/// One record with its placement fixed before acquisition.
struct PlannedRecord {
    index: u64,
    slot: u32,
    record: ManifestRecord,
    source: String,
}

/// Result of acquiring and transforming one record.
struct Acquisition {
    thumbnail: Result<RgbImage, AcquireError>,
    fetched_bytes: Option<u64>,
    transfer_capacity: usize,
}

/// Sizes the manifest up front, then fills atlases and the vertex buffer.
pub struct AtlasPipeline {
    config: PipelineConfig,
    state: PipelineState,
}

impl AtlasPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            state: PipelineState::ScanningManifest,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        debug!("Pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Counts records and plans the atlas grid. Leaves the stream rewound.
    pub fn prepare<R: BufRead + Seek>(
        &mut self,
        mut reader: R,
    ) -> Result<PreparedManifest<R>, PipelineError> {
        self.transition(PipelineState::ScanningManifest);
        let scan = scan_manifest(&mut reader).map_err(|source| PipelineError::ManifestRead {
            records_read: 0,
            record_count: 0,
            source,
        })?;

        self.transition(PipelineState::PlanningLayout);
        let config = &self.config;
        let layout = AtlasLayout::plan(
            config.atlas_width,
            config.atlas_height,
            config.cell_width,
            config.cell_height,
            scan.record_count(),
            config.atlas_count_policy,
        )?;

        info!("Object count: {}", layout.record_count);
        info!(
            "Vertex buffer: {} bytes",
            layout.record_count * std::mem::size_of::<VertexRecord>() as u64
        );
        info!(
            "Atlases: {} of {}x{} ({} cells of {}x{} each)",
            layout.atlas_count,
            layout.atlas_width,
            layout.atlas_height,
            layout.cells_per_atlas,
            layout.cell_width,
            layout.cell_height
        );

        self.transition(PipelineState::Ready);
        Ok(PreparedManifest { reader, layout })
    }

    /// Processes every record, writing `vertices` in manifest order and
    /// handing each finalised atlas to `sink`.
    pub fn run<R, F, S>(
        &mut self,
        prepared: PreparedManifest<R>,
        fetcher: F,
        vertices: &mut [VertexRecord],
        sink: &mut S,
    ) -> Result<PipelineReport, PipelineError>
    where
        R: BufRead,
        F: RemoteFetch,
        S: AtlasSink,
    {
        let PreparedManifest { reader, layout } = prepared;
        let acquirer = ImageAcquirer::new(fetcher, self.config.base_dir.clone());
        let mut reader = ManifestReader::new(reader);
        let mut writer = AtlasWriter {
            layout,
            packer: AtlasPacker::new(layout, self.config.fallback_colour),
            emitter: VertexEmitter::new(vertices),
            sink,
            report: PipelineReport {
                record_count: layout.record_count,
                ..PipelineReport::default()
            },
        };

        let progress = self.progress_bar(layout.record_count);

        self.transition(PipelineState::Processing);
        if layout.record_count > 0 {
            writer.packer.begin_atlas();
        }

        if self.config.worker_count() <= 1 {
            self.process_sequential(&mut reader, &acquirer, &mut writer, &progress)?;
        } else {
            self.process_parallel(&mut reader, &acquirer, &mut writer, &progress)?;
        }
        progress.finish_with_message("Records processed");

        if writer.report.records_processed < layout.record_count {
            warn!(
                "Manifest ended after {} of {} planned records",
                writer.report.records_processed, layout.record_count
            );
        }

        self.transition(PipelineState::Draining);
        if writer.packer.has_placements() {
            writer.flush()?;
        }
        // Blank trailing atlases planned by the faithful policy.
        while writer.packer.finalized_count() < layout.atlas_count {
            writer.packer.begin_atlas();
            writer.flush()?;
        }

        self.transition(PipelineState::Done);
        let report = writer.report;
        log_summary(&report);
        Ok(report)
    }

    /// One record at a time on the calling thread.
    fn process_sequential<R: BufRead, F: RemoteFetch, S: AtlasSink>(
        &self,
        reader: &mut ManifestReader<R>,
        acquirer: &ImageAcquirer<F>,
        writer: &mut AtlasWriter<'_, S>,
        progress: &ProgressBar,
    ) -> Result<(), PipelineError> {
        let mut transfer = TransferBuffer::new();
        while let Some(planned) = self.next_planned(reader, &writer.layout)? {
            let acquisition = acquire_thumbnail(acquirer, &planned.source, &self.config, &mut transfer);
            writer.apply(planned, acquisition)?;
            progress.inc(1);
        }
        Ok(())
    }

    /// Windows of `queue_depth` records acquired on a worker pool and applied
    /// in manifest order by this thread.
    fn process_parallel<R: BufRead, F: RemoteFetch, S: AtlasSink>(
        &self,
        reader: &mut ManifestReader<R>,
        acquirer: &ImageAcquirer<F>,
        writer: &mut AtlasWriter<'_, S>,
        progress: &ProgressBar,
    ) -> Result<(), PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.worker_count())
            .thread_name(|i| format!("atlas-acquire-{}", i))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("cannot start worker pool: {}", e)))?;

        let depth = self.config.queue_depth;
        let mut window: Vec<PlannedRecord> = Vec::with_capacity(depth);

        loop {
            window.clear();
            while window.len() < depth {
                match self.next_planned(reader, &writer.layout)? {
                    Some(planned) => window.push(planned),
                    None => break,
                }
            }
            if window.is_empty() {
                break;
            }

            let config = &self.config;
            let acquisitions: Vec<Acquisition> = pool.install(|| {
                window
                    .par_iter()
                    .map_init(TransferBuffer::new, |transfer, planned| {
                        acquire_thumbnail(acquirer, &planned.source, config, transfer)
                    })
                    .collect()
            });

            for (planned, acquisition) in window.drain(..).zip(acquisitions) {
                writer.apply(planned, acquisition)?;
                progress.inc(1);
            }
        }
        Ok(())
    }

    /// Reads the next record and fixes its slot from its manifest position.
    fn next_planned<R: BufRead>(
        &self,
        reader: &mut ManifestReader<R>,
        layout: &AtlasLayout,
    ) -> Result<Option<PlannedRecord>, PipelineError> {
        let next = reader.next_record().map_err(|source| PipelineError::ManifestRead {
            records_read: reader.records_read(),
            record_count: layout.record_count,
            source,
        })?;

        let Some((index, record)) = next else {
            return Ok(None);
        };

        if index >= layout.record_count {
            return Err(PipelineError::CapacityExceeded {
                capacity: layout.record_count,
                attempted: index,
            });
        }

        let source = record.resolved_source(self.config.prefix.as_deref());
        Ok(Some(PlannedRecord {
            index,
            slot: layout.slot_of(index),
            record,
            source,
        }))
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.green/blue}] {pos}/{len} records ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("▉▊▋▌▍▎▏ "),
        );
        pb.set_message("Loading buffers");
        pb
    }
}

/// Acquires and scales one record's image. Never touches shared state.
fn acquire_thumbnail<F: RemoteFetch>(
    acquirer: &ImageAcquirer<F>,
    source: &str,
    config: &PipelineConfig,
    transfer: &mut TransferBuffer,
) -> Acquisition {
    let result = acquirer.acquire(source, transfer);
    let transfer_capacity = transfer.capacity();
    match result {
        Ok(acquired) => Acquisition {
            thumbnail: Ok(make_thumbnail(&acquired.pixels, config.cell_width)),
            fetched_bytes: acquired.fetched_bytes,
            transfer_capacity,
        },
        Err(e) => Acquisition {
            thumbnail: Err(e),
            fetched_bytes: None,
            transfer_capacity,
        },
    }
}

/// Single writer for the packer, the vertex buffer and the sink.
struct AtlasWriter<'v, S> {
    layout: AtlasLayout,
    packer: AtlasPacker,
    emitter: VertexEmitter<'v>,
    sink: &'v mut S,
    report: PipelineReport,
}

impl<S: AtlasSink> AtlasWriter<'_, S> {
    /// Places one record's cell and vertex, flushing at atlas boundaries.
    fn apply(&mut self, planned: PlannedRecord, acquisition: Acquisition) -> Result<(), PipelineError> {
        if planned.slot == 0 && planned.index > 0 {
            self.flush()?;
            self.packer.begin_atlas();
            debug!(
                "Atlas {} begins at record {}",
                self.layout.atlas_of(planned.index),
                planned.index
            );
        }

        if planned.record.malformed {
            warn!("Record {}: malformed coordinates read as zero", planned.index);
            self.report.malformed_lines += 1;
        }
        if planned.record.fallback_source {
            self.report.unnamed_sources += 1;
        }

        if let Some(bytes) = acquisition.fetched_bytes {
            self.report.remote_fetches += 1;
            self.report.bytes_fetched += bytes;
        }
        self.report.peak_transfer_capacity = self
            .report
            .peak_transfer_capacity
            .max(acquisition.transfer_capacity as u64);

        match acquisition.thumbnail {
            Ok(thumbnail) => {
                self.packer.place_thumbnail(planned.slot, &thumbnail);
                self.report.thumbnails_placed += 1;
            }
            Err(e) => {
                warn!("Record {}: could not load {}: {}", planned.index, planned.source, e);
                self.packer.place_fallback(planned.slot);
                self.report.fallback_cells += 1;
            }
        }

        self.emitter
            .emit(VertexRecord::new(planned.record.position, planned.slot))?;
        self.report.records_processed += 1;
        Ok(())
    }

    /// Hands the current atlas to the sink.
    fn flush(&mut self) -> Result<(), PipelineError> {
        if let Some(atlas) = self.packer.finalize_atlas() {
            let index = atlas.index;
            self.sink
                .upload_atlas(atlas)
                .map_err(|source| PipelineError::Sink {
                    atlas: index,
                    source,
                })?;
            self.report.atlases_finalized += 1;
        }
        Ok(())
    }
}

fn log_summary(report: &PipelineReport) {
    info!(
        "Parsed {} records into {} atlases",
        report.records_processed, report.atlases_finalized
    );
    if report.fallback_cells > 0 {
        warn!(
            "{} of {} images unavailable, fallback colour used",
            report.fallback_cells, report.records_processed
        );
    }
    if report.malformed_lines > 0 {
        warn!("{} malformed manifest lines", report.malformed_lines);
    }
    if report.remote_fetches > 0 {
        info!(
            "Fetched {} remote images ({} bytes, peak buffer {} bytes)",
            report.remote_fetches, report.bytes_fetched, report.peak_transfer_capacity
        );
    }
}

/// Output of a whole-file ingestion.
pub struct IngestOutput {
    pub layout: AtlasLayout,
    pub vertices: Vec<VertexRecord>,
    pub report: PipelineReport,
}

/// Opens `manifest_path`, sizes the vertex buffer from it and runs the
/// pipeline with the HTTP fetcher.
pub fn ingest_manifest<S: AtlasSink>(
    manifest_path: &Path,
    config: PipelineConfig,
    sink: &mut S,
) -> Result<IngestOutput, PipelineError> {
    info!("Loading '{}'", manifest_path.display());

    let file = File::open(manifest_path).map_err(|source| PipelineError::UnreadableManifest {
        path: manifest_path.to_path_buf(),
        source,
    })?;

    let fetcher = HttpFetcher::new(Duration::from_secs(config.http_timeout_secs))?;
    let mut pipeline = AtlasPipeline::new(config)?;
    let prepared = pipeline.prepare(BufReader::new(file))?;
    let layout = *prepared.layout();

    let mut vertices = vec![VertexRecord::default(); layout.record_count as usize];
    let report = pipeline.run(prepared, fetcher, &mut vertices, sink)?;

    Ok(IngestOutput {
        layout,
        vertices,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::AtlasImage;
    use crate::config::AtlasCountPolicy;
    use crate::test_support::{local_client, serve_once, solid_image, test_dir, StaticFetcher};
    use std::io::Cursor;

    const YELLOW: [u8; 3] = [255, 255, 0];

    fn small_config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            atlas_width: 4,
            atlas_height: 4,
            cell_width: 2,
            cell_height: 2,
            base_dir: Some(dir.to_path_buf()),
            ..PipelineConfig::default()
        }
    }

    fn run_manifest(
        config: PipelineConfig,
        manifest: &str,
    ) -> (Vec<VertexRecord>, Vec<AtlasImage>, PipelineReport) {
        let mut pipeline = AtlasPipeline::new(config).unwrap();
        let prepared = pipeline
            .prepare(Cursor::new(manifest.as_bytes().to_vec()))
            .unwrap();
        assert_eq!(pipeline.state(), PipelineState::Ready);

        let mut vertices = vec![VertexRecord::default(); prepared.record_count() as usize];
        let mut atlases = Vec::new();
        let report = pipeline
            .run(prepared, StaticFetcher::failing(), &mut vertices, &mut atlases)
            .unwrap();
        assert_eq!(pipeline.state(), PipelineState::Done);
        (vertices, atlases, report)
    }

    #[test]
    fn test_all_failures_still_produce_well_formed_output() {
        let dir = test_dir("pipeline_all_fail");
        let manifest = "0 0 0 a.png\n1 1 1 b.png\n2 2 2 c.png\n3 3 3 d.png\n4 4 4 e.png\n";
        let (vertices, atlases, report) = run_manifest(small_config(&dir), manifest);

        assert_eq!(atlases.len(), 2);
        assert!(atlases[0].pixels.chunks(3).all(|p| p == YELLOW));
        assert_eq!(atlases[1].placed, 1);
        for (i, v) in vertices.iter().enumerate() {
            assert_eq!(v.position(), [i as f32; 3]);
            assert_eq!(v.slot_index(), (i % 4) as u32);
        }
        assert_eq!(report.fallback_cells, 5);
        assert_eq!(report.thumbnails_placed, 0);
    }

    #[test]
    fn test_single_record_final_atlas_is_flushed() {
        let dir = test_dir("pipeline_single_tail");
        solid_image(2, 2, [9, 9, 9]).save(dir.join("a.png")).unwrap();
        let manifest = "0 0 0 a.png\n".repeat(5);
        let (_, atlases, report) = run_manifest(small_config(&dir), &manifest);

        assert_eq!(atlases.len(), 2);
        assert_eq!(atlases[1].index, 1);
        assert_eq!(atlases[1].pixel(0, 0), [9, 9, 9]);
        assert_eq!(report.atlases_finalized, 2);
        assert_eq!(report.thumbnails_placed, 5);
    }

    #[test]
    fn test_empty_manifest() {
        let dir = test_dir("pipeline_empty");
        let (vertices, atlases, report) = run_manifest(small_config(&dir), "");
        assert!(vertices.is_empty());
        assert!(atlases.is_empty());
        assert_eq!(report.atlases_finalized, 0);

        let faithful = PipelineConfig {
            atlas_count_policy: AtlasCountPolicy::Faithful,
            ..small_config(&dir)
        };
        let (_, atlases, _) = run_manifest(faithful, "");
        assert_eq!(atlases.len(), 1);
        assert!(atlases[0].pixels.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_oversized_remote_response_becomes_fallback() {
        let dir = test_dir("pipeline_oversized_remote");
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 9223372036854775000\r\nConnection: close\r\n\r\n"
                .to_vec(),
        );
        let manifest = format!("0 0 0 {}\n", url);

        let mut pipeline = AtlasPipeline::new(small_config(&dir)).unwrap();
        let prepared = pipeline.prepare(Cursor::new(manifest.into_bytes())).unwrap();
        let mut vertices = vec![VertexRecord::default(); 1];
        let mut atlases = Vec::new();
        let report = pipeline
            .run(
                prepared,
                HttpFetcher::from_client(local_client()),
                &mut vertices,
                &mut atlases,
            )
            .unwrap();

        assert_eq!(report.fallback_cells, 1);
        assert_eq!(report.remote_fetches, 0);
        assert_eq!(atlases.len(), 1);
        assert_eq!(atlases[0].pixel(0, 0), YELLOW);
        assert_eq!(pipeline.state(), PipelineState::Done);
    }

    #[test]
    fn test_unterminated_last_line_is_processed() {
        let dir = test_dir("pipeline_unterminated");
        let (vertices, _, report) = run_manifest(small_config(&dir), "0 0 0 a.png\n7 8 9 b.png");
        assert_eq!(vertices.len(), 2);
        assert_eq!(vertices[1].position(), [7.0, 8.0, 9.0]);
        assert_eq!(report.records_processed, 2);
    }

    #[test]
    fn test_malformed_and_unnamed_lines_are_counted() {
        let dir = test_dir("pipeline_malformed");
        let (vertices, _, report) = run_manifest(small_config(&dir), "x 1 2 a.png\n\n3 4 5\n");
        assert_eq!(vertices.len(), 3);
        assert_eq!(vertices[0].position(), [0.0, 1.0, 2.0]);
        assert_eq!(vertices[2].position(), [3.0, 4.0, 5.0]);
        assert_eq!(report.malformed_lines, 2);
        assert_eq!(report.unnamed_sources, 2);
    }

    #[test]
    fn test_growing_manifest_exceeds_capacity() {
        let dir = test_dir("pipeline_capacity");
        let mut pipeline = AtlasPipeline::new(small_config(&dir)).unwrap();
        let prepared = pipeline
            .prepare(Cursor::new(b"0 0 0 a.png\n1 1 1 b.png\n".to_vec()))
            .unwrap();

        // A buffer smaller than the scan implied trips the emitter.
        let mut vertices = vec![VertexRecord::default(); 1];
        let mut atlases: Vec<AtlasImage> = Vec::new();
        let err = pipeline
            .run(prepared, StaticFetcher::failing(), &mut vertices, &mut atlases)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CapacityExceeded {
                capacity: 1,
                attempted: 1
            }
        ));
    }

    #[test]
    fn test_non_divisor_layout_fails_before_processing() {
        let dir = test_dir("pipeline_bad_layout");
        let config = PipelineConfig {
            cell_width: 3,
            ..small_config(&dir)
        };
        let mut pipeline = AtlasPipeline::new(config).unwrap();
        let err = pipeline
            .prepare(Cursor::new(b"0 0 0 a.png\n".to_vec()))
            .err()
            .unwrap();
        assert!(err.is_configuration());
        assert_eq!(pipeline.state(), PipelineState::PlanningLayout);
    }

    #[test]
    fn test_parallel_output_matches_sequential() {
        let dir = test_dir("pipeline_parallel");
        for (i, shade) in [10u8, 60, 110, 160, 210].iter().enumerate() {
            solid_image(3 + i as u32, 2, [*shade, 0, 255 - shade])
                .save(dir.join(format!("img{}.png", i)))
                .unwrap();
        }
        let mut manifest = String::new();
        for i in 0..23 {
            let name = if i % 7 == 3 { "missing.png".to_string() } else { format!("img{}.png", i % 5) };
            manifest.push_str(&format!("{} {} {} {}\n", i, -i, i * 2, name));
        }

        let sequential = run_manifest(small_config(&dir), &manifest);
        let parallel = run_manifest(
            PipelineConfig {
                workers: 4,
                queue_depth: 5,
                ..small_config(&dir)
            },
            &manifest,
        );

        assert_eq!(sequential.0, parallel.0);
        assert_eq!(sequential.1, parallel.1);
        assert_eq!(sequential.2, parallel.2);
        assert_eq!(sequential.1.len(), 6);
    }
}
