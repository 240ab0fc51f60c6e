//! One cropping session: a source image, its selector, the confirm
//! control and the last produced payload.

use crate::convert::{crop_and_encode, CropOptions, CropOutput, RasterSurface};
use crate::error::{CropError, SolveError};
use crate::geometry::SelectionRect;
use crate::selector::{RegionSelector, SelectorConfig};
use crate::solve::{Solution, SolveRequest, Solver};
use crate::source::SourceImage;
use serde::Serialize;
use tracing::{info, warn};

/// State of the "confirm crop" control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmControl {
    /// Selection is below the minimum size.
    Disabled,
    Enabled,
    /// A crop is being rasterized and encoded.
    Busy,
}

#[derive(Debug)]
pub struct CropSession {
    source: SourceImage,
    selector: RegionSelector,
    options: CropOptions,
    busy: bool,
    last_output: Option<CropOutput>,
}

impl CropSession {
    pub fn new(source: SourceImage, options: CropOptions) -> Self {
        let config = SelectorConfig::new(source.displayed_size());
        Self::with_config(source, config, options)
    }

    /// Uses a caller-built selector config; its container is replaced by the
    /// source's displayed size.
    pub fn with_config(source: SourceImage, mut config: SelectorConfig, options: CropOptions) -> Self {
        config.container = source.displayed_size();
        let selector = RegionSelector::new(config);
        Self {
            source,
            selector,
            options,
            busy: false,
            last_output: None,
        }
    }

    pub fn source(&self) -> &SourceImage {
        &self.source
    }

    pub fn options(&self) -> &CropOptions {
        &self.options
    }

    pub fn selector(&self) -> &RegionSelector {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut RegionSelector {
        &mut self.selector
    }

    pub fn selection(&self) -> SelectionRect {
        self.selector.selection()
    }

    /// Selects the whole displayed image again.
    pub fn select_all(&mut self) {
        let full = self.source.full_rect();
        self.selector.reset(full);
    }

    /// Supersedes the source image. The selection falls back to the full
    /// image and any previous payload is dropped.
    pub fn replace_source(&mut self, source: SourceImage) -> Result<(), CropError> {
        if self.busy {
            return Err(CropError::CropInProgress);
        }
        self.selector.relayout(source.displayed_size());
        self.source = source;
        self.last_output = None;
        Ok(())
    }

    pub fn confirm_control(&self) -> ConfirmControl {
        if self.busy {
            ConfirmControl::Busy
        } else if self.selector.can_confirm() {
            ConfirmControl::Enabled
        } else {
            ConfirmControl::Disabled
        }
    }

    /// Disables the confirm control and snapshots what needs cropping. The
    /// returned job may run on another thread; hand its result to
    /// [`CropSession::finish_confirm`].
    pub fn begin_confirm(&mut self) -> Result<CropJob, CropError> {
        if self.busy {
            return Err(CropError::CropInProgress);
        }
        let selection = self.selector.selection();
        if !self.selector.can_confirm() {
            return Err(CropError::SelectionTooSmall {
                width: selection.width,
                height: selection.height,
            });
        }
        self.busy = true;
        Ok(CropJob {
            source: self.source.clone(),
            selection,
            options: self.options,
        })
    }

    /// Re-enables the confirm control and keeps a successful payload.
    pub fn finish_confirm(
        &mut self,
        result: Result<CropOutput, CropError>,
    ) -> Result<&CropOutput, CropError> {
        self.busy = false;
        match result {
            Ok(output) => {
                info!(
                    width = output.encoded.width,
                    height = output.encoded.height,
                    bytes = output.encoded.bytes.len(),
                    "crop confirmed"
                );
                Ok(self.last_output.insert(output))
            }
            Err(err) => {
                warn!(error = %err, "crop failed");
                Err(err)
            }
        }
    }

    /// Synchronous confirm.
    pub fn confirm(&mut self, surface: &dyn RasterSurface) -> Result<&CropOutput, CropError> {
        let job = self.begin_confirm()?;
        let result = job.run(surface);
        self.finish_confirm(result)
    }

    pub fn last_output(&self) -> Option<&CropOutput> {
        self.last_output.as_ref()
    }

    /// Sends the retained crop (if any) with `text` to the solver. The crop
    /// stays available for a retry whatever the outcome.
    pub fn submit<S: Solver + ?Sized>(
        &self,
        solver: &S,
        text: Option<&str>,
    ) -> Result<Solution, SolveError> {
        let request = SolveRequest {
            text,
            image: self.last_output.as_ref().map(|out| &out.encoded),
        };
        solver.solve(&request)
    }
}

/// Snapshot of one crop request.
#[derive(Debug, Clone)]
pub struct CropJob {
    source: SourceImage,
    selection: SelectionRect,
    options: CropOptions,
}

impl CropJob {
    pub fn selection(&self) -> SelectionRect {
        self.selection
    }

    pub fn run(&self, surface: &dyn RasterSurface) -> Result<CropOutput, CropError> {
        crop_and_encode(&self.source, &self.selection, &self.options, surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::CpuSurface;
    use crate::geometry::{Point, Size};
    use image::{DynamicImage, GenericImageView, RgbaImage};
    use std::cell::Cell;

    fn session() -> CropSession {
        let src = SourceImage::from_raster(DynamicImage::new_rgba8(1200, 900))
            .with_displayed_size(Size::new(400.0, 300.0));
        CropSession::new(src, CropOptions::default())
    }

    struct FailingSurface;

    impl RasterSurface for FailingSurface {
        fn acquire(&self, width: u32, height: u32) -> Result<RgbaImage, CropError> {
            Err(CropError::RenderContextUnavailable {
                width,
                height,
                reason: "exhausted".to_string(),
            })
        }
    }

    struct CountingSolver {
        calls: Cell<usize>,
        fail: bool,
    }

    impl Solver for CountingSolver {
        fn solve(&self, request: &SolveRequest<'_>) -> Result<Solution, SolveError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(SolveError::EmptyResponse);
            }
            Ok(Solution {
                problem: request.text.unwrap_or_default().to_string(),
                final_answer: format!("{}", request.image.map(|i| i.width).unwrap_or(0)),
                ..Solution::default()
            })
        }
    }

    #[test]
    fn starts_with_full_image_selected() {
        let s = session();
        assert_eq!(s.selection(), SelectionRect::new(0.0, 0.0, 400.0, 300.0));
        assert_eq!(s.confirm_control(), ConfirmControl::Enabled);
    }

    #[test]
    fn confirm_produces_native_crop() {
        let mut s = session();
        let sel = s.selector_mut();
        sel.on_gesture_start(Point::new(50.0, 50.0));
        sel.on_gesture_move(Point::new(150.0, 120.0));
        sel.on_gesture_end();
        let out = s.confirm(&CpuSurface::default()).unwrap();
        assert_eq!((out.encoded.width, out.encoded.height), (300, 210));
        assert_eq!(out.encoded.decode().unwrap().dimensions(), (300, 210));
    }

    #[test]
    fn small_selection_disables_confirm() {
        let mut s = session();
        s.selector_mut().reset(SelectionRect::new(10.0, 10.0, 5.0, 5.0));
        assert_eq!(s.confirm_control(), ConfirmControl::Disabled);
        assert!(matches!(
            s.confirm(&CpuSurface::default()),
            Err(CropError::SelectionTooSmall { .. })
        ));
        s.selector_mut().reset(SelectionRect::new(10.0, 10.0, 12.0, 12.0));
        assert_eq!(s.confirm_control(), ConfirmControl::Enabled);
        assert!(s.confirm(&CpuSurface::default()).is_ok());
    }

    #[test]
    fn control_is_busy_until_job_finishes() {
        let mut s = session();
        let job = s.begin_confirm().unwrap();
        assert_eq!(s.confirm_control(), ConfirmControl::Busy);
        assert!(matches!(s.begin_confirm(), Err(CropError::CropInProgress)));
        let same = s.source().clone();
        assert!(matches!(
            s.replace_source(same),
            Err(CropError::CropInProgress)
        ));

        let handle = std::thread::spawn(move || job.run(&CpuSurface::default()));
        let result = handle.join().unwrap();
        s.finish_confirm(result).unwrap();
        assert_eq!(s.confirm_control(), ConfirmControl::Enabled);
        assert!(s.last_output().is_some());
    }

    #[test]
    fn surface_failure_leaves_session_usable() {
        let mut s = session();
        s.selector_mut().reset(SelectionRect::new(20.0, 20.0, 50.0, 50.0));
        let err = s.confirm(&FailingSurface).unwrap_err();
        assert_eq!(err.user_message(), "Could not process image, try again.");
        assert_eq!(s.confirm_control(), ConfirmControl::Enabled);
        assert_eq!(s.selection(), SelectionRect::new(20.0, 20.0, 50.0, 50.0));
        assert!(s.last_output().is_none());
        assert!(s.confirm(&CpuSurface::default()).is_ok());
    }

    #[test]
    fn failed_solve_keeps_crop_for_retry() {
        let mut s = session();
        s.selector_mut().reset(SelectionRect::new(0.0, 0.0, 100.0, 100.0));
        s.confirm(&CpuSurface::default()).unwrap();

        let failing = CountingSolver {
            calls: Cell::new(0),
            fail: true,
        };
        assert!(s.submit(&failing, Some("x")).is_err());
        assert!(s.last_output().is_some());

        let working = CountingSolver {
            calls: Cell::new(0),
            fail: false,
        };
        let solution = s.submit(&working, Some("solve for x")).unwrap();
        assert_eq!(solution.problem, "solve for x");
        assert_eq!(solution.final_answer, "300");
        assert_eq!(working.calls.get(), 1);
    }

    #[test]
    fn new_source_resets_selection_and_payload() {
        let mut s = session();
        s.selector_mut().reset(SelectionRect::new(0.0, 0.0, 50.0, 50.0));
        s.confirm(&CpuSurface::default()).unwrap();
        let next = SourceImage::from_raster(DynamicImage::new_rgba8(64, 48));
        s.replace_source(next).unwrap();
        assert_eq!(s.selection(), SelectionRect::new(0.0, 0.0, 64.0, 48.0));
        assert!(s.last_output().is_none());
    }
}
