// Copyright 2024 The Mgt Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Terminal output with optional coloring.

use std::io::IsTerminal as _;

use crossterm::style::Color;
use crossterm::style::Stylize as _;

pub struct Ui {
    color: bool,
}

impl Ui {
    pub fn new() -> Self {
        let color =
            std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Ui { color }
    }

    pub fn write(&mut self, text: &str) {
        print!("{text}");
    }

    pub fn writeln(&mut self, text: &str) {
        println!("{text}");
    }

    pub fn error(&mut self, text: &str) {
        eprintln!("Error: {text}");
    }

    pub fn hint(&mut self, text: &str) {
        eprintln!("Hint: {text}");
    }

    fn styled(&self, text: &str, color: Color) -> String {
        if self.color {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn green(&self, text: &str) -> String {
        self.styled(text, Color::Green)
    }

    pub fn red(&self, text: &str) -> String {
        self.styled(text, Color::Red)
    }

    pub fn yellow(&self, text: &str) -> String {
        self.styled(text, Color::Yellow)
    }

    pub fn cyan(&self, text: &str) -> String {
        self.styled(text, Color::Cyan)
    }
}
