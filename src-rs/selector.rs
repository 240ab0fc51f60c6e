//! Interactive region selector.
//!
//! Gesture handling is a pure transition over [`GestureState`]; the
//! [`RegionSelector`] wraps it and owns the current selection.

use crate::geometry::{Point, SelectionRect, Size};
use crate::gesture::{GestureEvent, PointerEvent};
use std::fmt;
use tracing::debug;

/// Smallest selection side, in displayed pixels, that can be confirmed.
pub const MIN_SELECTION_SIDE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GestureState {
    #[default]
    Idle,
    Dragging {
        anchor: Point,
    },
}

impl GestureState {
    pub fn is_dragging(&self) -> bool {
        matches!(self, GestureState::Dragging { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub state: GestureState,
    /// New selection, when the event changed it.
    pub selection: Option<SelectionRect>,
}

/// Applies one gesture event. Points are clamped to `container` first.
pub fn transition(state: GestureState, event: GestureEvent, container: Size) -> Transition {
    match event {
        GestureEvent::Start(point) => {
            let anchor = point.clamp_to(container);
            Transition {
                state: GestureState::Dragging { anchor },
                selection: Some(SelectionRect::at(anchor)),
            }
        }
        GestureEvent::Move(point) => match state {
            GestureState::Dragging { anchor } => Transition {
                state,
                selection: Some(SelectionRect::from_corners(
                    anchor,
                    point.clamp_to(container),
                )),
            },
            GestureState::Idle => Transition {
                state,
                selection: None,
            },
        },
        GestureEvent::End => Transition {
            state: GestureState::Idle,
            selection: None,
        },
    }
}

type SelectionCallback = Box<dyn FnMut(&SelectionRect) + Send>;

pub struct SelectorConfig {
    pub container: Size,
    pub min_selection_side: f64,
    on_selection_change: Option<SelectionCallback>,
}

impl SelectorConfig {
    pub fn new(container: Size) -> Self {
        Self {
            container,
            min_selection_side: MIN_SELECTION_SIDE,
            on_selection_change: None,
        }
    }

    pub fn min_selection_side(mut self, side: f64) -> Self {
        self.min_selection_side = side;
        self
    }

    pub fn on_selection_change<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&SelectionRect) + Send + 'static,
    {
        self.on_selection_change = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for SelectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorConfig")
            .field("container", &self.container)
            .field("min_selection_side", &self.min_selection_side)
            .field("on_selection_change", &self.on_selection_change.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct RegionSelector {
    config: SelectorConfig,
    state: GestureState,
    selection: SelectionRect,
}

impl RegionSelector {
    /// Starts idle with the whole container selected.
    pub fn new(config: SelectorConfig) -> Self {
        let selection = config.container.to_rect();
        Self {
            config,
            state: GestureState::Idle,
            selection,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn selection(&self) -> SelectionRect {
        self.selection
    }

    pub fn container(&self) -> Size {
        self.config.container
    }

    pub fn on_gesture_start(&mut self, point: Point) {
        self.apply(GestureEvent::Start(point));
    }

    pub fn on_gesture_move(&mut self, point: Point) {
        self.apply(GestureEvent::Move(point));
    }

    pub fn on_gesture_end(&mut self) {
        self.apply(GestureEvent::End);
    }

    /// Replaces the selection, e.g. "select whole image". Does not touch the
    /// gesture state.
    pub fn reset(&mut self, rect: SelectionRect) {
        let rect = rect.clamp_to(self.config.container);
        self.set_selection(rect);
    }

    pub fn handle(&mut self, event: GestureEvent) {
        self.apply(event);
    }

    /// Feeds a raw device event, given the container's on-screen offset.
    pub fn handle_pointer(&mut self, event: &PointerEvent, container_offset: Point) {
        self.apply(GestureEvent::from_pointer(event, container_offset));
    }

    /// Adopts a new container size, e.g. after a new image was laid out, and
    /// selects all of it.
    pub fn relayout(&mut self, container: Size) {
        self.config.container = container;
        self.set_selection(container.to_rect());
    }

    /// Whether the current selection is large enough to confirm.
    pub fn can_confirm(&self) -> bool {
        self.selection
            .meets_minimum(self.config.min_selection_side)
    }

    fn apply(&mut self, event: GestureEvent) {
        let was_dragging = self.state.is_dragging();
        let next = transition(self.state, event, self.config.container);
        self.state = next.state;
        match event {
            GestureEvent::Start(_) => debug!(restart = was_dragging, "selection gesture started"),
            GestureEvent::End if was_dragging => {
                debug!(selection = ?self.selection, "selection gesture ended")
            }
            _ => {}
        }
        if let Some(rect) = next.selection {
            self.set_selection(rect);
        }
    }

    fn set_selection(&mut self, rect: SelectionRect) {
        self.selection = rect;
        if let Some(callback) = self.config.on_selection_change.as_mut() {
            callback(&rect);
        }
    }
}
