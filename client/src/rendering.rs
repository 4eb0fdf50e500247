use log::debug;
use shared::screen::{PixelRect, Point};
use shared::{Color, DrawSurface, TextStyle};

/// Headless surface that logs every primitive it is asked to paint
#[derive(Debug, Default)]
pub struct TraceSurface {
    frames: u64,
    primitives: u64,
    last_frame: Vec<String>,
}

impl TraceSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new frame, forgetting the previous one's primitives
    pub fn begin_frame(&mut self) {
        self.frames += 1;
        self.last_frame.clear();
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn primitives(&self) -> u64 {
        self.primitives
    }

    /// Primitives painted since the last `begin_frame`, in paint order
    pub fn last_frame(&self) -> &[String] {
        &self.last_frame
    }

    fn record(&mut self, primitive: String) {
        debug!("frame {}: {}", self.frames, primitive);
        self.primitives += 1;
        self.last_frame.push(primitive);
    }
}

impl DrawSurface for TraceSurface {
    fn fill(&mut self, color: Color, gradient: Option<Color>) {
        match gradient {
            Some(to) => self.record(format!("fill {:?} -> {:?}", color, to)),
            None => self.record(format!("fill {:?}", color)),
        }
    }

    fn blit(&mut self, image: &str, pos: Point) {
        self.record(format!("blit {} at {:?}", image, pos));
    }

    fn line(&mut self, color: Color, start: Point, end: Point, width: u32) {
        self.record(format!("line {:?} {:?}-{:?} w{}", color, start, end, width));
    }

    fn circle(&mut self, color: Color, center: Point, radius: f32, width: u32) {
        self.record(format!("circle {:?} {:?} r{} w{}", color, center, radius, width));
    }

    fn polygon(&mut self, color: Color, points: &[Point], width: u32) {
        self.record(format!("polygon {:?} {:?} w{}", color, points, width));
    }

    fn rect(&mut self, color: Color, rect: PixelRect, width: u32) {
        self.record(format!("rect {:?} {:?} w{}", color, rect, width));
    }

    fn text(&mut self, text: &str, pos: Point, _style: &TextStyle) {
        self.record(format!("text {:?} at {:?}", text, pos));
    }

    fn textbox(&mut self, text: &str, rect: PixelRect, _style: &TextStyle) {
        self.record(format!("textbox {:?} in {:?}", text, rect));
    }
}
