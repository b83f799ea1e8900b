use super::{BoardView, PanelRenderer, RenderError};

/// No-hardware renderer used during bring-up and in tests.
#[derive(Default, Debug, Clone, Copy)]
pub struct NullRenderer;

impl NullRenderer {
    pub const fn new() -> Self {
        Self
    }
}

impl PanelRenderer for NullRenderer {
    fn render(&mut self, _view: &BoardView<'_>) -> Result<(), RenderError> {
        Ok(())
    }
}
