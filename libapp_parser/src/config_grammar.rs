pub use grammar::*;

peg::parser! {
    grammar grammar() for str {
        use crate::Line;

        rule whitespace()
          = quiet!{[' ' | '\t' | '\u{00A0}' | '\u{FEFF}']}

        rule eol()
          = quiet!{ "\r\n" / "\n" / "\r" }
          / expected!("<newline>")

        rule comment()
            = quiet!{ ['#' | ';'] (!['\n' | '\r'][_])* }

        rule section_name() -> &'input str
            = quiet!{ $( (!['\n' | '\r' | ']'][_])+ ) }
            / expected!("<section name>")

        rule section() -> Line<'input>
            = whitespace()* "[" n:section_name() "]" whitespace()* comment()? { Line::Section(n.trim()) }

        rule key() -> &'input str
            = quiet!{ $( (!['=' | '\n' | '\r' | '[' | '#' | ';' | ' ' | '\t'][_]) (!['=' | '\n' | '\r'][_])* ) }
            / expected!("<key>")

        rule value() -> &'input str
            = $( (!['\n' | '\r'][_])* )

        rule entry() -> Line<'input>
            = whitespace()* k:key() "=" v:value() { Line::Entry(k.trim(), v.trim()) }

        rule blank() -> Line<'input>
            = whitespace()* comment()? { Line::Blank }

        rule line() -> Line<'input>
            = section() / entry() / blank()

        rule terminated_line() -> Line<'input>
            = l:line() eol() { l }

        pub rule config() -> Vec<Line<'input>>
            = l:terminated_line()* last:line()? {
                let mut l = l;
                l.extend(last);
                l
            }
    }
}
