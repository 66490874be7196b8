
// Instrument drivers, organized by manufacturer.  Each one speaks to the instrument through a
// channel::InstrumentChannel so it works the same over serial, VXI-11 or a loopback.

pub mod tektronix;
