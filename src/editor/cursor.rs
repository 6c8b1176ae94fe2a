use crate::document::model::BlockId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorPosition {
    pub block_id: BlockId,
    pub offset: usize,
}

impl Default for CursorPosition {
    fn default() -> Self {
        Self {
            block_id: BlockId(1),
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRange {
    pub start: CursorPosition,
    pub end: CursorPosition,
}

impl SelectionRange {
    pub fn caret(position: CursorPosition) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    pub fn is_caret(&self) -> bool {
        self.start == self.end
    }

    /// Orders the endpoints of a same-block selection. Cross-block ranges are
    /// ordered against the document in `commands::normalize_selection`, which
    /// knows block positions.
    pub fn normalized(self) -> Self {
        if self.start.block_id == self.end.block_id && self.start.offset > self.end.offset {
            Self {
                start: self.end,
                end: self.start,
            }
        } else {
            self
        }
    }
}

/// Caret, live selection, and the selection remembered across focus loss so
/// toolbar-style commands can restore it.
#[derive(Debug, Clone, Default)]
pub struct CursorState {
    pub position: CursorPosition,
    pub selection: Option<SelectionRange>,
    pub remembered: Option<SelectionRange>,
}

impl CursorState {
    pub fn set_caret(&mut self, position: CursorPosition) {
        self.position = position;
        self.selection = None;
    }

    pub fn set_selection(&mut self, start: CursorPosition, end: CursorPosition) {
        let range = SelectionRange { start, end }.normalized();
        self.position = range.end;
        self.selection = Some(range);
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Called when the host reports focus leaving the editing surface.
    pub fn remember_active(&mut self) {
        if let Some(selection) = self.selection {
            self.remembered = Some(selection);
        }
    }

    /// The selection a command should operate on: the live one if present,
    /// otherwise the remembered one (restoring it as live).
    pub fn take_for_command(&mut self) -> Option<SelectionRange> {
        if let Some(selection) = self.selection {
            return Some(selection);
        }
        if let Some(remembered) = self.remembered.take() {
            self.selection = Some(remembered);
            return Some(remembered);
        }
        None
    }
}
