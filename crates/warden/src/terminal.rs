//! Terminal front end: raw-mode key polling and an ASCII frame preview.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::{cursor, queue, terminal};
use image::GrayImage;
use std::io::{self, Write};
use std::time::Duration;
use warden_core::session::FrameReport;
use warden_core::FaceRect;

const ASCII_RAMP: &[u8] = b" .:-=+*%@";
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 24;
const NEUTRAL_BORDER: char = '+';
const LOCKED_BORDER: char = '#';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Quit,
    Capture,
    Finish,
}

/// What the operations need from the screen and keyboard.
pub trait Ui {
    /// Wait at most `timeout` for a key press.
    fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<Key>>;
    fn show_recognition(&mut self, image: &GrayImage, report: &FrameReport) -> io::Result<()>;
    fn show_capture(
        &mut self,
        image: &GrayImage,
        face: Option<&FaceRect>,
        captured: u32,
        target: u32,
    ) -> io::Result<()>;
}

fn map_key(key: KeyEvent) -> Option<Key> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') => Some(Key::Quit),
        // Raw mode swallows SIGINT.
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Key::Quit),
        KeyCode::Char(' ') => Some(Key::Capture),
        KeyCode::Esc => Some(Key::Finish),
        _ => None,
    }
}

/// Raw-mode terminal. The previous mode is restored on drop.
pub struct Terminal {
    renderer: AsciiRenderer,
    out: io::Stdout,
}

impl Terminal {
    pub fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut out = io::stdout();
        queue!(out, terminal::Clear(terminal::ClearType::All), cursor::Hide)?;
        out.flush()?;
        Ok(Self {
            renderer: AsciiRenderer::fit_terminal(),
            out,
        })
    }

    fn draw(&mut self, body: &str) -> io::Result<()> {
        queue!(
            self.out,
            cursor::MoveTo(0, 0),
            terminal::Clear(terminal::ClearType::FromCursorDown)
        )?;
        self.out.write_all(body.as_bytes())?;
        self.out.flush()
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = queue!(self.out, cursor::Show, cursor::MoveToNextLine(1));
        let _ = self.out.flush();
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

impl Ui for Terminal {
    fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<Key>> {
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                return Ok(map_key(key));
            }
        }
        Ok(None)
    }

    fn show_recognition(&mut self, image: &GrayImage, report: &FrameReport) -> io::Result<()> {
        let body = self.renderer.render_report(image, report);
        self.draw(&body)
    }

    fn show_capture(
        &mut self,
        image: &GrayImage,
        face: Option<&FaceRect>,
        captured: u32,
        target: u32,
    ) -> io::Result<()> {
        let body = self.renderer.render_capture(image, face, captured, target);
        self.draw(&body)
    }
}

/// Draws grayscale frames as character grids.
pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Size to the current terminal, leaving room for the text lines.
    pub fn fit_terminal() -> Self {
        let (w, h) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));
        Self::new(w.min(160), h.saturating_sub(3))
    }

    pub fn render_report(&self, image: &GrayImage, report: &FrameReport) -> String {
        let mut grid = self.shade(image);
        for face in &report.faces {
            let border = if face.is_locked() {
                LOCKED_BORDER
            } else {
                NEUTRAL_BORDER
            };
            self.outline(&mut grid, image, &face.rect, border, &face.label.to_string());
        }
        let status = report.status.to_string();
        let help = "q: quit";
        self.finish(grid, &[&status, help])
    }

    pub fn render_capture(
        &self,
        image: &GrayImage,
        face: Option<&FaceRect>,
        captured: u32,
        target: u32,
    ) -> String {
        let mut grid = self.shade(image);
        if let Some(rect) = face {
            self.outline(&mut grid, image, rect, NEUTRAL_BORDER, "");
        }
        let progress = format!("images: {captured}/{target}");
        let help = if face.is_some() {
            "space: capture  esc: finish"
        } else {
            "no face in view  esc: finish"
        };
        self.finish(grid, &[&progress, help])
    }

    fn shade(&self, image: &GrayImage) -> Vec<Vec<char>> {
        let (iw, ih) = image.dimensions();
        let mut grid = vec![vec![' '; self.width]; self.height];
        if iw == 0 || ih == 0 {
            return grid;
        }
        for (ty, row) in grid.iter_mut().enumerate() {
            let y = (ty as u64 * ih as u64 / self.height as u64) as u32;
            for (tx, cell) in row.iter_mut().enumerate() {
                let x = (tx as u64 * iw as u64 / self.width as u64) as u32;
                let level = image.get_pixel(x, y)[0] as usize;
                *cell = ASCII_RAMP[level * (ASCII_RAMP.len() - 1) / 255] as char;
            }
        }
        grid
    }

    /// Scale `rect` into grid cells as a half-open `[x0, x1) × [y0, y1)` span.
    fn cells(&self, image: &GrayImage, rect: &FaceRect) -> (usize, usize, usize, usize) {
        let (iw, ih) = image.dimensions();
        let sx = |x: u32| (x as u64 * self.width as u64 / iw.max(1) as u64) as usize;
        let sy = |y: u32| (y as u64 * self.height as u64 / ih.max(1) as u64) as usize;
        let x0 = sx(rect.x).min(self.width - 1);
        let y0 = sy(rect.y).min(self.height - 1);
        let x1 = sx(rect.x + rect.width).clamp(x0 + 1, self.width);
        let y1 = sy(rect.y + rect.height).clamp(y0 + 1, self.height);
        (x0, y0, x1, y1)
    }

    fn outline(
        &self,
        grid: &mut [Vec<char>],
        image: &GrayImage,
        rect: &FaceRect,
        border: char,
        label: &str,
    ) {
        let (x0, y0, x1, y1) = self.cells(image, rect);
        for x in x0..x1 {
            grid[y0][x] = border;
            grid[y1 - 1][x] = border;
        }
        for row in &mut grid[y0..y1] {
            row[x0] = border;
            row[x1 - 1] = border;
        }
        if label.is_empty() {
            return;
        }
        // Label sits above the box, or inside its top edge at the screen top.
        let ly = if y0 > 0 { y0 - 1 } else { y0 };
        for (i, ch) in label.chars().enumerate() {
            let x = x0 + i;
            if x >= self.width {
                break;
            }
            grid[ly][x] = ch;
        }
    }

    fn finish(&self, grid: Vec<Vec<char>>, footer: &[&str]) -> String {
        let mut lines: Vec<String> =
            grid.into_iter().map(|row| row.into_iter().collect()).collect();
        lines.extend(footer.iter().map(|s| s.to_string()));
        lines.join("\r\n")
    }
}
