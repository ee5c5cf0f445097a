use strum::{AsRefStr, Display, EnumIter, IntoEnumIterator};

/// Entries of the slash command menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum BlockCommand {
    Image,
}

/// Slash menu state: open while the focused block's text is `/` followed by a
/// prefix of at least one command name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CommandMenu {
    filter: String,
    options: Vec<BlockCommand>,
    highlighted: usize,
}

impl CommandMenu {
    /// Opens the menu if `content` is exactly `/`.
    pub fn open_for(content: &str) -> Option<Self> {
        if content != "/" {
            return None;
        }
        Some(Self {
            filter: String::new(),
            options: BlockCommand::iter().collect(),
            highlighted: 0,
        })
    }

    pub fn options(&self) -> &[BlockCommand] {
        &self.options
    }

    pub fn highlighted(&self) -> usize {
        self.highlighted
    }

    pub fn highlighted_command(&self) -> Option<BlockCommand> {
        self.options.get(self.highlighted).copied()
    }

    pub fn move_down(&mut self) {
        let n = self.options.len();
        if n > 0 {
            self.highlighted = (self.highlighted + 1) % n;
        }
    }

    pub fn move_up(&mut self) {
        let n = self.options.len();
        if n > 0 {
            self.highlighted = (self.highlighted + n - 1) % n;
        }
    }

    /// Re-filters against new block content. Returns false when the content no
    /// longer matches any command, meaning the menu should close.
    pub fn refilter(&mut self, content: &str) -> bool {
        let Some(rest) = content.strip_prefix('/') else {
            return false;
        };
        let q = rest.to_lowercase();
        let options = BlockCommand::iter()
            .filter(|c| c.as_ref().starts_with(q.as_str()))
            .collect::<Vec<_>>();
        if options.is_empty() {
            return false;
        }

        if options != self.options {
            self.highlighted = 0;
        }
        self.filter = rest.to_string();
        self.options = options;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_only_on_sole_slash() {
        assert!(CommandMenu::open_for("/").is_some());
        assert!(CommandMenu::open_for("a/").is_none());
        assert!(CommandMenu::open_for("//").is_none());
        assert!(CommandMenu::open_for("").is_none());
    }

    #[test]
    fn test_single_option_wraps_in_both_directions() {
        let mut m = CommandMenu::open_for("/").expect("menu opens");
        assert_eq!(m.options(), &[BlockCommand::Image]);
        m.move_down();
        assert_eq!(m.highlighted(), 0);
        m.move_up();
        assert_eq!(m.highlighted(), 0);
    }

    #[test]
    fn test_refilter_keeps_prefix_matches() {
        let mut m = CommandMenu::open_for("/").expect("menu opens");
        assert!(m.refilter("/im"));
        assert_eq!(m.filter, "im");
        assert!(m.refilter("/IMAGE"));
        assert!(!m.refilter("/imx"));
        assert!(!m.refilter("image"));
    }

    #[test]
    fn test_command_names_are_lowercase() {
        assert_eq!(BlockCommand::Image.to_string(), "image");
    }
}
