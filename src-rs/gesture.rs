//! Pointer and touch input normalization.
//!
//! Mouse and touch events are folded into three gesture events expressed in
//! container-local coordinates, so the selector never sees device details.

use crate::geometry::Point;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Down,
    Move,
    Up,
    Leave,
    TouchStart,
    TouchMove,
    TouchEnd,
    TouchCancel,
}

/// Raw device event in client (viewport) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    pub client: Point,
}

impl PointerEvent {
    pub fn new(kind: PointerKind, x: f64, y: f64) -> Self {
        Self {
            kind,
            client: Point::new(x, y),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureEvent {
    Start(Point),
    Move(Point),
    End,
}

impl GestureEvent {
    /// Converts a device event using the container's on-screen offset.
    pub fn from_pointer(event: &PointerEvent, container_offset: Point) -> Self {
        let local = event
            .client
            .offset_by(container_offset.x, container_offset.y);
        match event.kind {
            PointerKind::Down | PointerKind::TouchStart => GestureEvent::Start(local),
            PointerKind::Move | PointerKind::TouchMove => GestureEvent::Move(local),
            PointerKind::Up
            | PointerKind::Leave
            | PointerKind::TouchEnd
            | PointerKind::TouchCancel => GestureEvent::End,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GestureScriptError {
    #[error("unknown gesture step `{0}`")]
    UnknownStep(String),
    #[error("gesture step `{0}` needs a point like `x,y`")]
    MissingPoint(String),
    #[error("invalid point `{0}`")]
    InvalidPoint(String),
}

/// Parses a replayable gesture such as `down 50,50; move 150,120; up`.
///
/// Steps are separated by `;` or newlines. Coordinates are client
/// coordinates; `up`, `leave`, `touchend` and `touchcancel` take none.
pub fn parse_gesture_script(script: &str) -> Result<Vec<PointerEvent>, GestureScriptError> {
    let mut events = Vec::new();
    for raw in script.split([';', '\n']) {
        let step = raw.trim();
        if step.is_empty() {
            continue;
        }
        let mut parts = step.splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or_default().to_ascii_lowercase();
        let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

        let kind = match verb.as_str() {
            "down" | "start" => PointerKind::Down,
            "move" => PointerKind::Move,
            "up" | "end" => PointerKind::Up,
            "leave" => PointerKind::Leave,
            "touchstart" => PointerKind::TouchStart,
            "touchmove" => PointerKind::TouchMove,
            "touchend" => PointerKind::TouchEnd,
            "touchcancel" => PointerKind::TouchCancel,
            _ => return Err(GestureScriptError::UnknownStep(step.to_string())),
        };

        let point = match kind {
            PointerKind::Down
            | PointerKind::Move
            | PointerKind::TouchStart
            | PointerKind::TouchMove => {
                let arg = arg.ok_or_else(|| GestureScriptError::MissingPoint(step.to_string()))?;
                parse_point(arg)?
            }
            _ => Point::ZERO,
        };
        events.push(PointerEvent {
            kind,
            client: point,
        });
    }
    Ok(events)
}

/// Parses `x,y` into a point.
pub fn parse_point(raw: &str) -> Result<Point, GestureScriptError> {
    let invalid = || GestureScriptError::InvalidPoint(raw.to_string());
    let (x, y) = raw.split_once(',').ok_or_else(invalid)?;
    let x = x.trim().parse::<f64>().map_err(|_| invalid())?;
    let y = y.trim().parse::<f64>().map_err(|_| invalid())?;
    Ok(Point::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mouse_and_touch_steps() {
        let events =
            parse_gesture_script("down 50,50; move 150,120\ntouchmove 1.5, 2 ; up").unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], PointerEvent::new(PointerKind::Down, 50.0, 50.0));
        assert_eq!(
            events[2],
            PointerEvent::new(PointerKind::TouchMove, 1.5, 2.0)
        );
        assert_eq!(events[3].kind, PointerKind::Up);
    }

    #[test]
    fn rejects_bad_steps() {
        assert_eq!(
            parse_gesture_script("drag 1,2"),
            Err(GestureScriptError::UnknownStep("drag 1,2".to_string()))
        );
        assert_eq!(
            parse_gesture_script("move"),
            Err(GestureScriptError::MissingPoint("move".to_string()))
        );
        assert!(matches!(
            parse_gesture_script("down a,b"),
            Err(GestureScriptError::InvalidPoint(_))
        ));
    }

    #[test]
    fn subtracts_container_offset() {
        let event = PointerEvent::new(PointerKind::TouchStart, 120.0, 80.0);
        let gesture = GestureEvent::from_pointer(&event, Point::new(20.0, 30.0));
        assert_eq!(gesture, GestureEvent::Start(Point::new(100.0, 50.0)));
    }

    #[test]
    fn leave_and_cancel_end_the_gesture() {
        for kind in [
            PointerKind::Up,
            PointerKind::Leave,
            PointerKind::TouchEnd,
            PointerKind::TouchCancel,
        ] {
            let event = PointerEvent::new(kind, 0.0, 0.0);
            assert_eq!(
                GestureEvent::from_pointer(&event, Point::ZERO),
                GestureEvent::End
            );
        }
    }
}
