mod instrument_selftest;
