//! Remote screen protocol.
//!
//! On the server a [`RemoteScreenRecorder`] stands in for the real screen:
//! every drawing verb appends an [`Instruction`] instead of painting. Once per
//! tick the recorder is flushed and the whole frame is compared against the
//! previous one; only a changed frame goes out. On the client a
//! [`RemoteScreenPlayer`] replays the last received frame onto a
//! [`DrawSurface`] by dispatching each instruction through the RPC layer.

use crate::error::{ReplicationError, Result};
use crate::protocol::Instruction;
use crate::rpc::{Dispatcher, RpcMessage, RpcSink};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Integer pixel position.
pub type Point = (i32, i32);

/// `[x, y, w, h]` in pixels.
pub type PixelRect = [i32; 4];

pub const DRAW_LINE: &str = "draw.line";
pub const DRAW_CIRCLE: &str = "draw.circle";
pub const DRAW_POLYGON: &str = "draw.polygon";
pub const DRAW_RECT: &str = "draw.rect";
pub const DRAW_TEXT: &str = "draw.text";
pub const DRAW_TEXTBOX: &str = "draw.textbox";
pub const FILL: &str = "fill";
pub const BLIT: &str = "blit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    pub const BLACK: Color = Color(0, 0, 0);
    pub const WHITE: Color = Color(255, 255, 255);
    pub const RED: Color = Color(255, 0, 0);
    pub const GREEN: Color = Color(0, 255, 0);
    pub const BLUE: Color = Color(0, 0, 255);
    pub const YELLOW: Color = Color(255, 255, 0);
}

/// Axis-aligned rectangle in world or screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn from_center(center: (f32, f32), size: (f32, f32)) -> Self {
        Self::new(center.0 - size.0 / 2.0, center.1 - size.1 / 2.0, size.0, size.1)
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Overlap test; touching edges do not count.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right() && other.x < self.right() && self.y < other.bottom() && other.y < self.bottom()
    }

    pub fn contains_point(&self, point: (f32, f32)) -> bool {
        point.0 >= self.x && point.0 < self.right() && point.1 >= self.y && point.1 < self.bottom()
    }

    pub fn to_pixels(&self) -> PixelRect {
        [
            self.x.round() as i32,
            self.y.round() as i32,
            self.w.round() as i32,
            self.h.round() as i32,
        ]
    }
}

/// Optional text attributes carried as keyword arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fontsize: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fontname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<String>,
}

impl TextStyle {
    pub fn colored(color: Color) -> Self {
        Self {
            color: Some(color),
            ..Self::default()
        }
    }

    pub fn with_fontsize(mut self, fontsize: u32) -> Self {
        self.fontsize = Some(fontsize);
        self
    }

    fn to_kwargs(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

pub fn round_pos(pos: (f32, f32)) -> Point {
    (pos.0.round() as i32, pos.1.round() as i32)
}

/// Anything that can actually paint. Circle, polygon and rect use a width
/// of 0 for the filled variant.
pub trait DrawSurface {
    fn fill(&mut self, color: Color, gradient: Option<Color>);
    fn blit(&mut self, image: &str, pos: Point);
    fn line(&mut self, color: Color, start: Point, end: Point, width: u32);
    fn circle(&mut self, color: Color, center: Point, radius: f32, width: u32);
    fn polygon(&mut self, color: Color, points: &[Point], width: u32);
    fn rect(&mut self, color: Color, rect: PixelRect, width: u32);
    fn text(&mut self, text: &str, pos: Point, style: &TextStyle);
    fn textbox(&mut self, text: &str, rect: PixelRect, style: &TextStyle);
}

/// Server-side screen that records draw calls for one session.
#[derive(Debug, Clone)]
pub struct RemoteScreenRecorder {
    resolution: (u32, u32),
    current: Vec<Instruction>,
    previous: Vec<Instruction>,
}

impl RemoteScreenRecorder {
    pub fn new(resolution: (u32, u32)) -> Self {
        Self {
            resolution,
            current: Vec::new(),
            previous: Vec::new(),
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.resolution.0 as f32, self.resolution.1 as f32)
    }

    /// Follows a client window resize. Recorded frames are kept.
    pub fn set_resolution(&mut self, resolution: (u32, u32)) {
        self.resolution = resolution;
    }

    /// Last frame sent to the client.
    pub fn baseline(&self) -> Vec<Instruction> {
        self.previous.clone()
    }

    /// Instructions recorded since the last flush.
    pub fn recorded(&self) -> &[Instruction] {
        &self.current
    }

    /// Ends the frame. Returns the full instruction list when it differs
    /// from the previously flushed frame, `None` when it is identical.
    pub fn flush(&mut self) -> Option<Vec<Instruction>> {
        if self.current == self.previous {
            self.current.clear();
            return None;
        }
        self.previous = std::mem::take(&mut self.current);
        Some(self.previous.clone())
    }

    pub fn clear(&mut self) {
        self.fill(Color::BLACK, None);
    }

    pub fn fill(&mut self, color: Color, gradient: Option<Color>) {
        self.send(FILL, vec![json!(color), json!(gradient)], Map::new());
    }

    pub fn blit(&mut self, image: &str, pos: (f32, f32)) {
        self.send(BLIT, vec![json!(image), json!(round_pos(pos))], Map::new());
    }

    pub fn line(&mut self, start: (f32, f32), end: (f32, f32), color: Color, width: u32) {
        self.send(
            DRAW_LINE,
            vec![json!(color), json!(round_pos(start)), json!(round_pos(end)), json!(width)],
            Map::new(),
        );
    }

    pub fn circle(&mut self, pos: (f32, f32), radius: f32, color: Color, width: u32) {
        self.send(
            DRAW_CIRCLE,
            vec![json!(color), json!(round_pos(pos)), json!(radius), json!(width)],
            Map::new(),
        );
    }

    pub fn filled_circle(&mut self, pos: (f32, f32), radius: f32, color: Color) {
        self.circle(pos, radius, color, 0);
    }

    pub fn polygon(&mut self, points: &[(f32, f32)], color: Color) {
        self.record_polygon(points, color, 1);
    }

    pub fn filled_polygon(&mut self, points: &[(f32, f32)], color: Color) {
        self.record_polygon(points, color, 0);
    }

    fn record_polygon(&mut self, points: &[(f32, f32)], color: Color, width: u32) {
        let points: Vec<Point> = points.iter().copied().map(round_pos).collect();
        self.send(DRAW_POLYGON, vec![json!(color), json!(points), json!(width)], Map::new());
    }

    pub fn rect(&mut self, rect: Rect, color: Color, width: u32) {
        self.send(
            DRAW_RECT,
            vec![json!(color), json!(rect.to_pixels()), json!(width)],
            Map::new(),
        );
    }

    pub fn filled_rect(&mut self, rect: Rect, color: Color) {
        self.rect(rect, color, 0);
    }

    pub fn text(&mut self, text: &str, pos: (f32, f32), style: &TextStyle) {
        let mut kwargs = style.to_kwargs();
        kwargs.insert("pos".to_string(), json!(round_pos(pos)));
        self.send(DRAW_TEXT, vec![json!(text)], kwargs);
    }

    pub fn textbox(&mut self, text: &str, rect: Rect, style: &TextStyle) {
        self.send(
            DRAW_TEXTBOX,
            vec![json!(text), json!(rect.to_pixels())],
            style.to_kwargs(),
        );
    }
}

impl RpcSink for RemoteScreenRecorder {
    fn push_message(&mut self, message: RpcMessage) {
        self.current.push(message);
    }
}

/// Client-side replay of the most recent frame.
pub struct RemoteScreenPlayer {
    instructions: Vec<Instruction>,
    dispatcher: Dispatcher<dyn DrawSurface>,
}

impl RemoteScreenPlayer {
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
            dispatcher: surface_dispatcher(),
        }
    }

    pub fn set_instructions(&mut self, instructions: Vec<Instruction>) {
        self.instructions = instructions;
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Paints every instruction in order. Returns how many were applied.
    pub fn replay(&self, surface: &mut (dyn DrawSurface + 'static)) -> usize {
        self.dispatcher.dispatch_all(surface, &self.instructions)
    }
}

impl Default for RemoteScreenPlayer {
    fn default() -> Self {
        Self::new()
    }
}

fn text_style(message: &RpcMessage) -> Result<TextStyle> {
    TextStyle::deserialize(&Value::Object(message.kwargs.clone())).map_err(|e| {
        ReplicationError::InvalidParams {
            method: message.method.clone(),
            reason: e.to_string(),
        }
    })
}

fn surface_dispatcher() -> Dispatcher<dyn DrawSurface> {
    let mut dispatcher: Dispatcher<dyn DrawSurface> = Dispatcher::new();
    dispatcher.register(FILL, |surface, msg| {
        surface.fill(msg.arg(0)?, msg.arg_or(1, None)?);
        Ok(())
    });
    dispatcher.register(BLIT, |surface, msg| {
        let image: String = msg.arg(0)?;
        surface.blit(&image, msg.arg(1)?);
        Ok(())
    });
    dispatcher.register(DRAW_LINE, |surface, msg| {
        surface.line(msg.arg(0)?, msg.arg(1)?, msg.arg(2)?, msg.arg_or(3, 1)?);
        Ok(())
    });
    dispatcher.register(DRAW_CIRCLE, |surface, msg| {
        surface.circle(msg.arg(0)?, msg.arg(1)?, msg.arg(2)?, msg.arg_or(3, 1)?);
        Ok(())
    });
    dispatcher.register(DRAW_POLYGON, |surface, msg| {
        let points: Vec<Point> = msg.arg(1)?;
        surface.polygon(msg.arg(0)?, &points, msg.arg_or(2, 1)?);
        Ok(())
    });
    dispatcher.register(DRAW_RECT, |surface, msg| {
        surface.rect(msg.arg(0)?, msg.arg(1)?, msg.arg_or(2, 1)?);
        Ok(())
    });
    dispatcher.register(DRAW_TEXT, |surface, msg| {
        let text: String = msg.arg(0)?;
        let pos = msg.kwarg("pos")?.unwrap_or((0, 0));
        surface.text(&text, pos, &text_style(msg)?);
        Ok(())
    });
    dispatcher.register(DRAW_TEXTBOX, |surface, msg| {
        let text: String = msg.arg(0)?;
        surface.textbox(&text, msg.arg(1)?, &text_style(msg)?);
        Ok(())
    });
    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[derive(Default)]
    struct RecordingSurface {
        calls: Vec<String>,
    }

    impl DrawSurface for RecordingSurface {
        fn fill(&mut self, color: Color, gradient: Option<Color>) {
            self.calls.push(format!("fill {:?} {:?}", color, gradient));
        }
        fn blit(&mut self, image: &str, pos: Point) {
            self.calls.push(format!("blit {} {:?}", image, pos));
        }
        fn line(&mut self, _color: Color, start: Point, end: Point, width: u32) {
            self.calls.push(format!("line {:?} {:?} {}", start, end, width));
        }
        fn circle(&mut self, _color: Color, center: Point, radius: f32, width: u32) {
            self.calls.push(format!("circle {:?} {} {}", center, radius, width));
        }
        fn polygon(&mut self, _color: Color, points: &[Point], width: u32) {
            self.calls.push(format!("polygon {} {}", points.len(), width));
        }
        fn rect(&mut self, _color: Color, rect: PixelRect, width: u32) {
            self.calls.push(format!("rect {:?} {}", rect, width));
        }
        fn text(&mut self, text: &str, pos: Point, style: &TextStyle) {
            self.calls.push(format!("text {} {:?} {:?}", text, pos, style.fontsize));
        }
        fn textbox(&mut self, text: &str, rect: PixelRect, _style: &TextStyle) {
            self.calls.push(format!("textbox {} {:?}", text, rect));
        }
    }

    fn frame(recorder: &mut RemoteScreenRecorder, x: f32) {
        recorder.clear();
        recorder.line((0.0, 0.0), (x, 10.0), Color::WHITE, 1);
    }

    #[test]
    fn test_flush_returns_changed_frame_once() {
        let mut recorder = RemoteScreenRecorder::new((800, 600));

        frame(&mut recorder, 10.0);
        let first = recorder.flush().unwrap();
        assert_eq!(first.len(), 2);

        frame(&mut recorder, 10.0);
        assert!(recorder.flush().is_none());
        frame(&mut recorder, 10.0);
        assert!(recorder.flush().is_none());
        assert!(recorder.recorded().is_empty());

        frame(&mut recorder, 20.0);
        assert!(recorder.flush().is_some());
    }

    #[test]
    fn test_empty_frame_after_content_is_a_change() {
        let mut recorder = RemoteScreenRecorder::new((800, 600));
        frame(&mut recorder, 10.0);
        recorder.flush();

        assert_eq!(recorder.flush(), Some(vec![]));
        assert!(recorder.flush().is_none());
        assert!(recorder.baseline().is_empty());
    }

    #[test]
    fn test_positions_rounded() {
        let mut recorder = RemoteScreenRecorder::new((800, 600));
        recorder.line((0.4, 0.6), (10.5, 2.2), Color::RED, 2);

        let line = &recorder.recorded()[0];
        assert_eq!(line.method, DRAW_LINE);
        assert_eq!(line.args[1], json!([0, 1]));
        assert_eq!(line.args[2], json!([11, 2]));
    }

    #[test]
    fn test_bounds_match_resolution() {
        let mut recorder = RemoteScreenRecorder::new((1280, 720));
        assert_eq!(recorder.bounds(), Rect::new(0.0, 0.0, 1280.0, 720.0));

        recorder.clear();
        recorder.set_resolution((640, 360));
        assert_eq!(recorder.resolution(), (640, 360));
        assert_eq!(recorder.bounds(), Rect::new(0.0, 0.0, 640.0, 360.0));
        assert_eq!(recorder.recorded().len(), 1);
    }

    #[test]
    fn test_replay_preserves_order() {
        let mut recorder = RemoteScreenRecorder::new((800, 600));
        recorder.clear();
        recorder.filled_circle((5.0, 5.0), 3.0, Color::BLUE);
        recorder.filled_rect(Rect::new(1.0, 2.0, 3.0, 4.0), Color::GREEN);
        recorder.text("Ahoy", (10.0, 20.0), &TextStyle::colored(Color::WHITE).with_fontsize(24));
        recorder.polygon(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)], Color::RED);
        recorder.blit("island", (3.0, 4.0));
        recorder.textbox("Captain", Rect::new(0.0, 0.0, 100.0, 20.0), &TextStyle::default());

        let mut player = RemoteScreenPlayer::new();
        player.set_instructions(recorder.flush().unwrap());
        let mut surface = RecordingSurface::default();

        assert_eq!(player.replay(&mut surface), 7);
        assert_eq!(
            surface.calls,
            vec![
                "fill Color(0, 0, 0) None",
                "circle (5, 5) 3 0",
                "rect [1, 2, 3, 4] 0",
                "text Ahoy (10, 20) Some(24)",
                "polygon 3 1",
                "blit island (3, 4)",
                "textbox Captain [0, 0, 100, 20]",
            ]
        );
    }

    #[test]
    fn test_replay_skips_bad_instructions() {
        let mut player = RemoteScreenPlayer::new();
        player.set_instructions(vec![
            RpcMessage::positional("draw.sparkle", vec![]),
            RpcMessage::positional(DRAW_LINE, vec![json!("not a color")]),
            RpcMessage::positional(FILL, vec![json!([1, 2, 3])]),
        ]);
        let mut surface = RecordingSurface::default();

        assert_eq!(player.replay(&mut surface), 1);
        assert_eq!(surface.calls, vec!["fill Color(1, 2, 3) None"]);
    }

    #[test]
    fn test_rect_intersection() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&Rect::new(5.0, 5.0, 10.0, 10.0)));
        assert!(!a.intersects(&Rect::new(10.0, 0.0, 5.0, 5.0)));
        assert_eq!(Rect::from_center((5.0, 5.0), (10.0, 10.0)), a);
        assert!(a.contains_point((9.9, 0.0)));
    }

    #[test]
    fn test_rect_center() {
        let (x, y) = Rect::from_center((0.3, 0.7), (3.3, 1.1)).center();
        assert_approx_eq!(x, 0.3, 1e-5);
        assert_approx_eq!(y, 0.7, 1e-5);
    }
}
