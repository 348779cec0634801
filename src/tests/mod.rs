//! Cross-component scenario tests exercising full coordination flows.
